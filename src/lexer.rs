//! Tokenizer: byte classification, whitespace/comment skipping, DFA dispatch
//! and keyword recognition. Line and column are maintained by the byte
//! consumer; `\n` bumps the line and resets the column.

pub mod dfa;
pub mod number;
pub mod punctuator;
pub mod string_lit;
pub mod token;

use crate::diag;
use crate::SourceFile;

use self::number::NumberDfa;
use self::punctuator::{is_punctuator_byte, PunctuatorDfa};
use self::string_lit::StringDfa;
use self::token::{keyword_lookup, Splice, Token, TokenKind};

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\n' | b'\r' | b'\t')
}

fn is_numeric(byte: u8) -> bool {
    byte.is_ascii_digit()
}

fn is_non_numeric(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_identifier_byte(byte: u8) -> bool {
    is_non_numeric(byte) || is_numeric(byte)
}

fn is_string_literal_byte(byte: u8) -> bool {
    (b' '..=b'~').contains(&byte)
}

pub struct Tokenizer<'a> {
    source: &'a SourceFile,
    bytes: &'a [u8],
    cursor: usize,
    line: u32,
    col: u32,
    number: NumberDfa,
    punctuator: PunctuatorDfa,
    string: StringDfa,
    pub errors: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        Tokenizer {
            source,
            bytes: source.text.as_bytes(),
            cursor: 0,
            line: 1,
            col: 1,
            number: NumberDfa::new(),
            punctuator: PunctuatorDfa::new(),
            string: StringDfa::new(),
            errors: 0,
        }
    }

    pub fn source(&self) -> &'a SourceFile {
        self.source
    }

    fn is_eof(&self) -> bool {
        self.cursor >= self.bytes.len()
    }

    fn peek_byte(&self) -> u8 {
        self.bytes[self.cursor]
    }

    fn consume_byte(&mut self) -> u8 {
        if self.is_eof() {
            return 0;
        }
        let byte = self.bytes[self.cursor];
        if byte == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.cursor += 1;
        byte
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && is_whitespace(self.peek_byte()) {
            self.consume_byte();
        }
    }

    fn skip_non_whitespace(&mut self) {
        while !self.is_eof() && !is_whitespace(self.peek_byte()) {
            self.consume_byte();
        }
    }

    fn skip_until(&mut self, byte: u8) {
        while !self.is_eof() && self.peek_byte() != byte {
            self.consume_byte();
        }
    }

    fn at_comment_start(&self) -> bool {
        self.peek_byte_pair()
            .map(|pair| pair == (b'/', b'/') || pair == (b'/', b'*'))
            .unwrap_or(false)
    }

    fn peek_byte_pair(&self) -> Option<(u8, u8)> {
        if self.cursor + 1 < self.bytes.len() {
            Some((self.bytes[self.cursor], self.bytes[self.cursor + 1]))
        } else {
            None
        }
    }

    fn skip_comment(&mut self) {
        match self.peek_byte_pair() {
            Some((b'/', b'/')) => {
                self.skip_until(b'\n');
                self.consume_byte();
            }
            Some((b'/', b'*')) => {
                self.consume_byte();
                self.consume_byte();
                // skip until "*/"; block comments do not nest
                loop {
                    self.skip_until(b'*');
                    self.consume_byte();
                    if self.is_eof() {
                        self.errors += 1;
                        diag::error(
                            &self.source.name,
                            self.line,
                            self.col,
                            format_args!("unterminated block comment"),
                        );
                        return;
                    }
                    if self.peek_byte() == b'/' {
                        self.consume_byte();
                        return;
                    }
                }
            }
            _ => {}
        }
    }

    fn splice_from(&self, start: usize) -> Splice {
        Splice {
            start,
            len: self.cursor - start,
        }
    }

    fn identifier_token(&mut self) -> (TokenKind, Splice) {
        let start = self.cursor;
        while !self.is_eof() && is_identifier_byte(self.peek_byte()) {
            self.consume_byte();
        }
        let splice = self.splice_from(start);
        let kind = keyword_lookup(splice.of(&self.source.text)).unwrap_or(TokenKind::Identifier);
        (kind, splice)
    }

    fn number_token(&mut self) -> (TokenKind, Splice) {
        let start = self.cursor;
        self.number.dfa.restart();
        let mut refused = false;
        // punctuator bytes only continue the literal while the automaton
        // accepts them (decimal points, hex exponent signs); anything else
        // is swallowed so `0x123z` becomes one error token
        while !self.is_eof() && !is_whitespace(self.peek_byte()) {
            let byte = self.peek_byte();
            if is_punctuator_byte(byte) {
                if self.number.dfa.will_error(byte) {
                    break;
                }
            } else if self.number.dfa.will_error(byte) {
                refused = true;
            }
            self.number.dfa.step(byte);
            self.consume_byte();
        }
        let splice = self.splice_from(start);
        let kind = if refused {
            TokenKind::Error
        } else {
            self.number.accepting_token()
        };
        (kind, splice)
    }

    fn punctuator_token(&mut self) -> (TokenKind, Splice) {
        let start = self.cursor;
        self.punctuator.dfa.restart();
        while !self.is_eof() && is_punctuator_byte(self.peek_byte()) {
            if self.punctuator.dfa.will_error(self.peek_byte()) {
                break;
            }
            self.punctuator.dfa.step(self.peek_byte());
            self.consume_byte();
        }
        (self.punctuator.accepting_token(), self.splice_from(start))
    }

    fn string_literal_token(&mut self) -> (TokenKind, Splice) {
        let start = self.cursor;
        self.string.dfa.restart();
        while !self.is_eof() && is_string_literal_byte(self.peek_byte()) {
            if self.string.dfa.will_error(self.peek_byte()) {
                break;
            }
            self.string.dfa.step(self.peek_byte());
            self.consume_byte();
        }
        (self.string.accepting_token(), self.splice_from(start))
    }

    fn char_literal_token(&mut self) -> (TokenKind, Splice) {
        let start = self.cursor;
        let mut kind = TokenKind::CharLiteral;
        self.consume_byte(); // opening quote

        if !self.is_eof() && self.peek_byte() == b'\\' {
            self.consume_byte();
            let allowed = [b'r', b'n', b't', b'\\', b'\'', b'0'];
            if self.is_eof() || !allowed.contains(&self.peek_byte()) {
                kind = TokenKind::Error;
            }
            self.consume_byte();
        } else {
            self.consume_byte();
        }

        if !self.is_eof() && self.peek_byte() == b'\'' {
            self.consume_byte();
        } else {
            // malformed literal spans to the next whitespace
            self.skip_non_whitespace();
            kind = TokenKind::Error;
        }
        (kind, self.splice_from(start))
    }

    /// Returns the next token; at stream end returns EOF indefinitely.
    pub fn next(&mut self) -> Token {
        loop {
            self.skip_whitespace();
            if !self.is_eof() && self.at_comment_start() {
                self.skip_comment();
            } else {
                break;
            }
        }

        let line = self.line;
        let col = self.col;

        if self.is_eof() {
            return Token {
                kind: TokenKind::Eof,
                splice: Splice {
                    start: self.cursor,
                    len: 0,
                },
                line,
                col,
            };
        }

        let byte = self.peek_byte();
        let (kind, splice) = if is_non_numeric(byte) {
            self.identifier_token()
        } else if is_numeric(byte) {
            self.number_token()
        } else if is_punctuator_byte(byte) {
            self.punctuator_token()
        } else if byte == b'"' {
            self.string_literal_token()
        } else if byte == b'\'' {
            self.char_literal_token()
        } else {
            self.consume_byte();
            (TokenKind::Error, self.splice_from(self.cursor - 1))
        };

        if kind == TokenKind::Error {
            self.errors += 1;
            diag::error(
                &self.source.name,
                line,
                col,
                format_args!(
                    "unrecognised token \"{}\"",
                    splice.of(&self.source.text)
                ),
            );
            self.skip_non_whitespace();
        }

        Token {
            kind,
            splice,
            line,
            col,
        }
    }

    /// Restores the cursor and position so the next `next()` re-emits the
    /// given token. Re-emission is deterministic; the parser relies on this
    /// for the declarator-vs-definition rewind.
    pub fn rewind_to(&mut self, checkpoint: Token) {
        self.cursor = checkpoint.splice.start;
        self.line = checkpoint.line;
        self.col = checkpoint.col;
    }
}

//! String-literal automaton. Only the closed-quote state accepts.

use num_enum::TryFromPrimitive;

use super::dfa::Dfa;
use super::token::TokenKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum StringState {
    Error = 0,
    Start,
    OpenQuote,
    Backslash,
    CloseQuote,
    Count,
}

#[derive(Debug)]
pub struct StringDfa {
    pub dfa: Dfa,
}

impl StringDfa {
    pub fn new() -> Self {
        use StringState as S;
        let mut dfa = Dfa::with_states(S::Count as u16);

        dfa.add_transition(S::Start as u16, "\"", S::OpenQuote as u16);
        dfa.add_transition_range(S::OpenQuote as u16, b' ', b'~', S::OpenQuote as u16);
        dfa.add_transition(S::OpenQuote as u16, "\\", S::Backslash as u16);
        dfa.add_transition(S::OpenQuote as u16, "\"", S::CloseQuote as u16);
        dfa.add_transition(S::Backslash as u16, "\\nrabftv0\"?", S::OpenQuote as u16);

        dfa.set_start_state(S::Start as u16);
        StringDfa { dfa }
    }

    pub fn accepting_token(&self) -> TokenKind {
        match StringState::try_from(self.dfa.current_state()) {
            Ok(StringState::CloseQuote) => TokenKind::StringLiteral,
            _ => TokenKind::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> TokenKind {
        let mut string = StringDfa::new();
        string.dfa.restart();
        for byte in text.bytes() {
            if string.dfa.will_error(byte) {
                break;
            }
            string.dfa.step(byte);
        }
        string.accepting_token()
    }

    #[test]
    fn escapes_and_termination() {
        assert_eq!(scan("\"hello\""), TokenKind::StringLiteral);
        assert_eq!(scan("\"a\\nb\""), TokenKind::StringLiteral);
        assert_eq!(scan("\"unterminated"), TokenKind::Error);
        assert_eq!(scan("\"bad\\q\""), TokenKind::Error);
    }
}

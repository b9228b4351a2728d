//! Numeric-literal automaton and literal value conversion.

use num_enum::TryFromPrimitive;

use super::dfa::Dfa;
use super::token::TokenKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum NumberState {
    // non-accepting
    Error = 0,
    InvalidOctal,
    Start,
    X,
    B,
    HexDot,
    HexAfterDot,
    HexExponent,
    HexExponentSign,

    // accepting
    Zero,
    Hex,
    Binary,
    Decimal,
    Octal,
    Double,
    Float,
    SuffixL,
    SuffixLl,
    SuffixU,
    SuffixUl,
    SuffixUll,
    HexDouble,
    HexFloat,

    Count,
}

#[derive(Debug)]
pub struct NumberDfa {
    pub dfa: Dfa,
}

impl NumberDfa {
    pub fn new() -> Self {
        use NumberState as S;
        let mut dfa = Dfa::with_states(S::Count as u16);
        let t = |d: &mut Dfa, from: S, on: &str, to: S| d.add_transition(from as u16, on, to as u16);

        t(&mut dfa, S::Start, "0", S::Zero);
        t(&mut dfa, S::Start, "123456789", S::Decimal);

        t(&mut dfa, S::Zero, "xX", S::X);
        t(&mut dfa, S::Zero, "bB", S::B);
        t(&mut dfa, S::Zero, "01234567", S::Octal);
        t(&mut dfa, S::Zero, "89", S::InvalidOctal);
        t(&mut dfa, S::Zero, ".", S::Double);
        t(&mut dfa, S::Zero, "U", S::SuffixU);
        t(&mut dfa, S::Zero, "L", S::SuffixL);

        t(&mut dfa, S::X, "0123456789abcdefABCDEF", S::Hex);
        t(&mut dfa, S::Hex, "0123456789abcdefABCDEF", S::Hex);
        t(&mut dfa, S::Hex, "U", S::SuffixU);
        t(&mut dfa, S::Hex, "L", S::SuffixL);
        t(&mut dfa, S::Hex, ".", S::HexDot);

        t(&mut dfa, S::HexDot, "0123456789abcdefABCDEF", S::HexAfterDot);
        t(&mut dfa, S::HexAfterDot, "0123456789abcdefABCDEF", S::HexAfterDot);
        t(&mut dfa, S::HexAfterDot, "p", S::HexExponent);
        t(&mut dfa, S::HexExponent, "0123456789", S::HexFloat);
        t(&mut dfa, S::HexExponent, "+-", S::HexExponentSign);
        t(&mut dfa, S::HexExponentSign, "0123456789", S::HexDouble);
        t(&mut dfa, S::HexDouble, "0123456789", S::HexDouble);
        t(&mut dfa, S::HexDouble, "f", S::HexFloat);

        t(&mut dfa, S::B, "01", S::Binary);
        t(&mut dfa, S::Binary, "01", S::Binary);

        t(&mut dfa, S::InvalidOctal, "0123456789", S::InvalidOctal);
        t(&mut dfa, S::InvalidOctal, ".", S::Double);

        t(&mut dfa, S::Octal, "01234567", S::Octal);
        t(&mut dfa, S::Octal, "89", S::InvalidOctal);
        t(&mut dfa, S::Octal, ".", S::Double);
        t(&mut dfa, S::Octal, "U", S::SuffixU);
        t(&mut dfa, S::Octal, "L", S::SuffixL);

        t(&mut dfa, S::Decimal, "0123456789", S::Decimal);
        t(&mut dfa, S::Decimal, ".", S::Double);
        t(&mut dfa, S::Decimal, "U", S::SuffixU);
        t(&mut dfa, S::Decimal, "L", S::SuffixL);

        t(&mut dfa, S::Double, "0123456789", S::Double);
        t(&mut dfa, S::Double, "f", S::Float);

        t(&mut dfa, S::SuffixU, "L", S::SuffixUl);
        t(&mut dfa, S::SuffixL, "L", S::SuffixLl);
        t(&mut dfa, S::SuffixUl, "L", S::SuffixUll);

        dfa.set_start_state(S::Start as u16);
        NumberDfa { dfa }
    }

    pub fn accepting_token(&self) -> TokenKind {
        let state = NumberState::try_from(self.dfa.current_state()).unwrap_or(NumberState::Error);
        use NumberState as S;
        match state {
            S::Binary => TokenKind::NumericBin,
            S::Zero | S::Decimal | S::SuffixU | S::SuffixUl | S::SuffixUll | S::SuffixL
            | S::SuffixLl => TokenKind::NumericDec,
            S::Octal => TokenKind::NumericOct,
            S::Double | S::HexDouble => TokenKind::NumericDouble,
            S::Float | S::HexFloat => TokenKind::NumericFloat,
            S::Hex => TokenKind::NumericHex,
            _ => TokenKind::Error,
        }
    }
}

/// Integer value of a numeric literal splice, suffixes included.
pub fn integer_value(text: &str) -> Option<i64> {
    let trimmed = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let (digits, radix) = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = trimmed.strip_prefix("0b").or_else(|| trimmed.strip_prefix("0B")) {
        (bin, 2)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        (&trimmed[1..], 8)
    } else {
        (trimmed, 10)
    };
    i64::from_str_radix(digits, radix).ok()
}

/// Byte value of a character literal splice, quotes included.
pub fn char_value(text: &str) -> Option<i64> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut bytes = inner.bytes();
    let value = match bytes.next()? {
        b'\\' => match bytes.next()? {
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'0' => 0,
            _ => return None,
        },
        byte => byte,
    };
    bytes.next().is_none().then_some(value as i64)
}

/// Value of a floating literal splice; handles the hexadecimal form the
/// automaton accepts (`0x1.8p3`) which `f64::from_str` does not.
pub fn float_value(text: &str) -> Option<f64> {
    let trimmed = text.trim_end_matches(['f', 'F']);
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        let (mantissa_text, exponent) = match hex.split_once('p') {
            Some((m, e)) => (m, e.parse::<i32>().ok()?),
            None => (hex, 0),
        };
        let (int_part, frac_part) = match mantissa_text.split_once('.') {
            Some((i, f)) => (i, f),
            None => (mantissa_text, ""),
        };
        let mut mantissa = 0.0f64;
        for digit in int_part.bytes() {
            mantissa = mantissa * 16.0 + (digit as char).to_digit(16)? as f64;
        }
        let mut scale = 1.0 / 16.0;
        for digit in frac_part.bytes() {
            mantissa += (digit as char).to_digit(16)? as f64 * scale;
            scale /= 16.0;
        }
        Some(mantissa * (exponent as f64).exp2())
    } else {
        trimmed.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> TokenKind {
        let mut number = NumberDfa::new();
        number.dfa.restart();
        for byte in text.bytes() {
            number.dfa.step(byte);
        }
        number.accepting_token()
    }

    #[test]
    fn literal_classes() {
        assert_eq!(scan("0"), TokenKind::NumericDec);
        assert_eq!(scan("123"), TokenKind::NumericDec);
        assert_eq!(scan("123UL"), TokenKind::NumericDec);
        assert_eq!(scan("0x1F"), TokenKind::NumericHex);
        assert_eq!(scan("0b101"), TokenKind::NumericBin);
        assert_eq!(scan("0755"), TokenKind::NumericOct);
        assert_eq!(scan("1.5"), TokenKind::NumericDouble);
        assert_eq!(scan("1.5f"), TokenKind::NumericFloat);
        assert_eq!(scan("0x1.8p3"), TokenKind::NumericFloat);
    }

    #[test]
    fn malformed_literals_do_not_accept() {
        assert_eq!(scan("0x"), TokenKind::Error);
        assert_eq!(scan("0b"), TokenKind::Error);
        assert_eq!(scan("078"), TokenKind::Error);
    }

    #[test]
    fn values() {
        assert_eq!(integer_value("0x10"), Some(16));
        assert_eq!(integer_value("0b101"), Some(5));
        assert_eq!(integer_value("010"), Some(8));
        assert_eq!(integer_value("42UL"), Some(42));
        assert_eq!(char_value("'a'"), Some('a' as i64));
        assert_eq!(char_value("'\\n'"), Some(10));
        assert_eq!(float_value("1.5"), Some(1.5));
        assert_eq!(float_value("2.5f"), Some(2.5));
        assert_eq!(float_value("0x1.8p3"), Some(12.0));
    }
}

//! Source-level C types and the usual-arithmetic-conversion rules.

use std::fmt;

use bitflags::bitflags;

use crate::lexer::token::TokenKind;

bitflags! {
    pub struct Qualifiers: u16 {
        // signedness
        const UNSIGNED = 1;
        const SIGNED = 1 << 1;

        // width modifiers; at most one may be set
        const LONG = 1 << 2;
        const LONG_LONG = 1 << 3;
        const SHORT = 1 << 4;

        // type qualifiers
        const VOLATILE = 1 << 5;
        const CONST = 1 << 6;

        // storage class specifiers
        const EXTERN = 1 << 7;
        const STATIC = 1 << 8;
        const INLINE = 1 << 9;
        const REGISTER = 1 << 10;
    }
}

/// Bits that participate in type equality; storage class and cv-qualifiers
/// do not change the represented value.
const EQUALITY_MASK: Qualifiers = Qualifiers::from_bits_truncate(
    Qualifiers::SHORT.bits()
        | Qualifiers::UNSIGNED.bits()
        | Qualifiers::LONG.bits()
        | Qualifiers::LONG_LONG.bits(),
);

#[derive(Clone, Debug)]
pub enum DataType {
    /// `int`, `char`, `float`, `double` with modifier bits.
    Primary { base: TokenKind, flags: Qualifiers },
    Pointer { to: Box<DataType>, flags: Qualifiers },
    Array { of: Box<DataType>, count: u64 },
    Struct { name: String },
    Union { name: String },
    /// Value produced by `&x` and address computations during lowering.
    Address { to: Box<DataType> },
    Void,
    Error,
}

impl DataType {
    pub fn int() -> DataType {
        DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::SIGNED,
        }
    }

    pub fn char_type() -> DataType {
        DataType::Primary {
            base: TokenKind::Char,
            flags: Qualifiers::SIGNED,
        }
    }

    pub fn long_long() -> DataType {
        DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::SIGNED | Qualifiers::LONG_LONG,
        }
    }

    pub fn unsigned_long() -> DataType {
        DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::UNSIGNED | Qualifiers::LONG,
        }
    }

    pub fn float() -> DataType {
        DataType::Primary {
            base: TokenKind::Float,
            flags: Qualifiers::empty(),
        }
    }

    pub fn double() -> DataType {
        DataType::Primary {
            base: TokenKind::Double,
            flags: Qualifiers::empty(),
        }
    }

    /// String literals: an array of char with an implicit address.
    pub fn string() -> DataType {
        DataType::Array {
            of: Box::new(DataType::char_type()),
            count: 0,
        }
    }

    pub fn pointer_to(inner: DataType) -> DataType {
        DataType::Pointer {
            to: Box::new(inner),
            flags: Qualifiers::empty(),
        }
    }

    pub fn flags(&self) -> Qualifiers {
        match self {
            DataType::Primary { flags, .. } | DataType::Pointer { flags, .. } => *flags,
            _ => Qualifiers::empty(),
        }
    }

    pub fn is_set(&self, flag: Qualifiers) -> bool {
        self.flags().contains(flag)
    }

    /// Number of `*`/`[]` layers.
    pub fn indirection_level(&self) -> u32 {
        let mut level = 0;
        let mut current = self;
        loop {
            match current {
                DataType::Pointer { to, .. }
                | DataType::Array { of: to, .. }
                | DataType::Address { to } => {
                    level += 1;
                    current = to;
                }
                _ => return level,
            }
        }
    }

    /// The pointee for a single address/array layer, the innermost type for
    /// a pointer chain.
    pub fn base_type(&self) -> &DataType {
        match self {
            DataType::Address { to } | DataType::Array { of: to, .. } => to,
            DataType::Pointer { .. } => {
                let mut current = self;
                while let DataType::Pointer { to, .. } = current {
                    current = to;
                }
                current
            }
            other => other,
        }
    }

    pub fn pointee(&self) -> Option<&DataType> {
        match self {
            DataType::Pointer { to, .. } | DataType::Array { of: to, .. } | DataType::Address { to } => {
                Some(to)
            }
            _ => None,
        }
    }

    pub fn is_primary(&self, kind: TokenKind) -> bool {
        matches!(self, DataType::Primary { base, .. } if *base == kind)
    }

    pub fn is_integer(&self) -> bool {
        self.is_primary(TokenKind::Int) || self.is_primary(TokenKind::Char)
    }

    pub fn is_floating(&self) -> bool {
        self.is_primary(TokenKind::Float) || self.is_primary(TokenKind::Double)
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, DataType::Struct { .. } | DataType::Union { .. })
    }

    pub fn composite_name(&self) -> Option<&str> {
        match self {
            DataType::Struct { name } | DataType::Union { name } => Some(name),
            _ => None,
        }
    }
}

/// Equality ignores storage-class bits and compares width/signedness/base
/// plus pointee equality transitively.
impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        if self.indirection_level() != other.indirection_level() {
            return false;
        }
        match (self, other) {
            (
                DataType::Primary { base: a, flags: fa },
                DataType::Primary { base: b, flags: fb },
            ) => a == b && (*fa & EQUALITY_MASK) == (*fb & EQUALITY_MASK),
            (DataType::Pointer { to: a, .. }, DataType::Pointer { to: b, .. })
            | (DataType::Address { to: a }, DataType::Address { to: b }) => a == b,
            (DataType::Array { of: a, count: ca }, DataType::Array { of: b, count: cb }) => {
                ca == cb && a == b
            }
            (DataType::Struct { name: a }, DataType::Struct { name: b })
            | (DataType::Union { name: a }, DataType::Union { name: b }) => a == b,
            (DataType::Void, DataType::Void) => true,
            (DataType::Error, DataType::Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Primary { base, flags } => {
                if flags.contains(Qualifiers::CONST) {
                    write!(f, "const ")?;
                }
                if flags.contains(Qualifiers::UNSIGNED) {
                    write!(f, "unsigned ")?;
                }
                if flags.contains(Qualifiers::LONG) {
                    write!(f, "long ")?;
                } else if flags.contains(Qualifiers::LONG_LONG) {
                    write!(f, "long long ")?;
                } else if flags.contains(Qualifiers::SHORT) {
                    write!(f, "short ")?;
                }
                match base {
                    TokenKind::Int => write!(f, "int"),
                    TokenKind::Char => write!(f, "char"),
                    TokenKind::Float => write!(f, "float"),
                    TokenKind::Double => write!(f, "double"),
                    other => write!(f, "{other:?}"),
                }
            }
            DataType::Pointer { to, .. } => write!(f, "{to}*"),
            DataType::Array { of, count } => write!(f, "{of}[{count}]"),
            DataType::Struct { name } => write!(f, "struct {name}"),
            DataType::Union { name } => write!(f, "union {name}"),
            DataType::Address { to } => write!(f, "&{to}"),
            DataType::Void => write!(f, "void"),
            DataType::Error => write!(f, "<error>"),
        }
    }
}

/// C's integer conversion rank: char < short < int < long < long long.
pub fn integer_conversion_rank(ty: &DataType) -> i32 {
    if ty.is_set(Qualifiers::LONG_LONG) {
        return 4;
    }
    if ty.is_set(Qualifiers::LONG) {
        return 3;
    }
    if ty.is_set(Qualifiers::SHORT) {
        return 1;
    }
    if ty.is_primary(TokenKind::Int) {
        return 2;
    }
    if ty.is_primary(TokenKind::Char) {
        return 0;
    }
    -1
}

/// The type a binary operation evaluates to, following C's usual arithmetic
/// conversions and the pointer-arithmetic rules.
pub fn resultant_type(left: &DataType, right: &DataType, op: TokenKind) -> DataType {
    let pointer_arith = matches!(
        op,
        TokenKind::Plus | TokenKind::Minus | TokenKind::PlusAssign | TokenKind::MinusAssign
    );

    if left.indirection_level() != right.indirection_level() {
        // (ptr + int) / (ptr - int) / (ptr += int) / (ptr -= int)
        if left.indirection_level() > 0 && right.is_integer() {
            if pointer_arith || op == TokenKind::Assignment {
                return left.clone();
            }
        } else if right.indirection_level() > 0 && left.is_integer() {
            if op == TokenKind::Plus || op == TokenKind::Assignment {
                return right.clone();
            }
        } else if left.indirection_level() > 0 && right.indirection_level() > 0 {
            // pointers of different depth only assign; the caller warns
            if op == TokenKind::Assignment {
                return left.clone();
            }
        }
    } else if left.indirection_level() > 0 {
        if op.is_assignment_op() {
            return left.clone();
        }
        if left == right && op == TokenKind::Minus {
            // pointer difference
            return DataType::long_long();
        }
    } else if left == right {
        if op == TokenKind::Assignment {
            return left.clone();
        }
        if matches!(left, DataType::Primary { .. }) {
            return left.clone();
        }
        // struct = struct between identically named structs only
        if left.is_composite() && op.is_assignment_op() {
            return left.clone();
        }
    } else if matches!(left, DataType::Primary { .. }) && matches!(right, DataType::Primary { .. })
    {
        if op.is_assignment_op() {
            return left.clone();
        }

        if left.is_primary(TokenKind::Double) || right.is_primary(TokenKind::Double) {
            return DataType::double();
        }
        if left.is_primary(TokenKind::Float) || right.is_primary(TokenKind::Float) {
            return DataType::float();
        }

        let same_signedness = (left.is_set(Qualifiers::SIGNED) && right.is_set(Qualifiers::SIGNED))
            || (left.is_set(Qualifiers::UNSIGNED) && right.is_set(Qualifiers::UNSIGNED));
        if same_signedness {
            if integer_conversion_rank(left) > integer_conversion_rank(right) {
                return left.clone();
            }
            return right.clone();
        }

        let (unsigned_ty, signed_ty) = if left.is_set(Qualifiers::UNSIGNED) {
            (left, right)
        } else {
            (right, left)
        };
        return signed_unsigned_conversion(unsigned_ty, signed_ty);
    }

    DataType::int()
}

/// If the unsigned operand has at least the signed operand's rank, the
/// unsigned type wins; otherwise the signed type wins when it can represent
/// the unsigned operand's whole range, else the unsigned counterpart of the
/// signed type.
fn signed_unsigned_conversion(unsigned_ty: &DataType, signed_ty: &DataType) -> DataType {
    if integer_conversion_rank(unsigned_ty) >= integer_conversion_rank(signed_ty) {
        return unsigned_ty.clone();
    }
    if signed_ty.is_set(Qualifiers::LONG_LONG) {
        return signed_ty.clone();
    }
    if signed_ty.is_set(Qualifiers::LONG) {
        if !unsigned_ty.is_set(Qualifiers::LONG) {
            return signed_ty.clone();
        }
    } else if !signed_ty.is_set(Qualifiers::SHORT) {
        if unsigned_ty.is_set(Qualifiers::SHORT) || unsigned_ty.is_primary(TokenKind::Char) {
            return signed_ty.clone();
        }
    } else if unsigned_ty.is_primary(TokenKind::Char) {
        return signed_ty.clone();
    }

    if let DataType::Primary { base, flags } = signed_ty {
        return DataType::Primary {
            base: *base,
            flags: (*flags - Qualifiers::SIGNED) | Qualifiers::UNSIGNED,
        };
    }
    signed_ty.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_storage_class() {
        let a = DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::SIGNED | Qualifiers::STATIC,
        };
        assert_eq!(a, DataType::int());
        let b = DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::UNSIGNED,
        };
        assert_ne!(b, DataType::int());
    }

    #[test]
    fn promotion_picks_higher_rank() {
        let long = DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::SIGNED | Qualifiers::LONG,
        };
        let result = resultant_type(&DataType::int(), &long, TokenKind::Plus);
        assert_eq!(result, long);
    }

    #[test]
    fn mixed_signedness_prefers_representable_signed() {
        let unsigned_short = DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::UNSIGNED | Qualifiers::SHORT,
        };
        let result = resultant_type(&unsigned_short, &DataType::int(), TokenKind::Plus);
        assert_eq!(result, DataType::int());

        let unsigned_int = DataType::Primary {
            base: TokenKind::Int,
            flags: Qualifiers::UNSIGNED,
        };
        let result = resultant_type(&unsigned_int, &DataType::int(), TokenKind::Plus);
        assert_eq!(result, unsigned_int);
    }

    #[test]
    fn floats_dominate_integers() {
        let result = resultant_type(&DataType::int(), &DataType::float(), TokenKind::Star);
        assert_eq!(result, DataType::float());
        let result = resultant_type(&DataType::double(), &DataType::float(), TokenKind::Star);
        assert_eq!(result, DataType::double());
    }

    #[test]
    fn pointer_rules() {
        let ptr = DataType::pointer_to(DataType::int());
        assert_eq!(resultant_type(&ptr, &DataType::int(), TokenKind::Plus), ptr);
        assert_eq!(
            resultant_type(&ptr, &ptr, TokenKind::Minus),
            DataType::long_long()
        );
    }
}

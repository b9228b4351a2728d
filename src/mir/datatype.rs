//! Machine-level type tags. Integer widths are fixed here: `int` is i32,
//! `long` and `long long` are i64, pointers are 8 bytes (LP64D).

use num_traits::PrimInt;

use crate::ast::datatype::{DataType, Qualifiers};
use crate::ast::scope::{ScopeId, Scopes};
use crate::lexer::token::TokenKind;

pub const XLEN: u64 = 8;
pub const FLEN: u64 = 8;

pub fn align_up<T: PrimInt>(value: T, align: T) -> T {
    let mask = align - T::one();
    (value + mask) & !mask
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirTypeKind {
    U8,
    U16,
    U32,
    U64,
    U128,
    I8,
    I16,
    I32,
    I64,
    I128,
    F16,
    F32,
    F64,
    F128,
    Struct,
    Ptr,
    Array,
    Bool,
    Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MirType {
    pub kind: MirTypeKind,
    pub size: u64,
    pub alignment: u64,
}

impl MirType {
    pub const U8: MirType = MirType::scalar(MirTypeKind::U8, 1);
    pub const U16: MirType = MirType::scalar(MirTypeKind::U16, 2);
    pub const U32: MirType = MirType::scalar(MirTypeKind::U32, 4);
    pub const U64: MirType = MirType::scalar(MirTypeKind::U64, 8);
    pub const I8: MirType = MirType::scalar(MirTypeKind::I8, 1);
    pub const I16: MirType = MirType::scalar(MirTypeKind::I16, 2);
    pub const I32: MirType = MirType::scalar(MirTypeKind::I32, 4);
    pub const I64: MirType = MirType::scalar(MirTypeKind::I64, 8);
    pub const F32: MirType = MirType::scalar(MirTypeKind::F32, 4);
    pub const F64: MirType = MirType::scalar(MirTypeKind::F64, 8);
    pub const PTR: MirType = MirType::scalar(MirTypeKind::Ptr, 8);
    pub const BOOL: MirType = MirType::scalar(MirTypeKind::Bool, 1);
    pub const VOID: MirType = MirType {
        kind: MirTypeKind::Void,
        size: 0,
        alignment: 1,
    };

    const fn scalar(kind: MirTypeKind, size: u64) -> MirType {
        MirType {
            kind,
            size,
            alignment: size,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            MirTypeKind::U8
                | MirTypeKind::U16
                | MirTypeKind::U32
                | MirTypeKind::U64
                | MirTypeKind::I8
                | MirTypeKind::I16
                | MirTypeKind::I32
                | MirTypeKind::I64
                | MirTypeKind::Ptr
                | MirTypeKind::Bool
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.kind, MirTypeKind::F32 | MirTypeKind::F64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self.kind,
            MirTypeKind::I8 | MirTypeKind::I16 | MirTypeKind::I32 | MirTypeKind::I64
        )
    }

    pub fn is_unsigned(&self) -> bool {
        self.is_integer() && !self.is_signed()
    }
}

/// RV64-specific size of an AST type. Composite sizes come from the layout
/// pass, which must have run for the declaring scope.
pub fn size_of_type(ty: &DataType, scopes: &Scopes, scope: ScopeId) -> u64 {
    lower_type(ty, scopes, scope).size
}

pub fn alignment_of_type(ty: &DataType, scopes: &Scopes, scope: ScopeId) -> u64 {
    lower_type(ty, scopes, scope).alignment
}

/// Maps a source-level type onto its machine representation.
pub fn lower_type(ty: &DataType, scopes: &Scopes, scope: ScopeId) -> MirType {
    match ty {
        DataType::Pointer { .. } | DataType::Address { .. } => MirType::PTR,
        DataType::Array { of, count } => {
            let element = lower_type(of, scopes, scope);
            MirType {
                kind: MirTypeKind::Array,
                size: *count * element.size,
                alignment: element.alignment,
            }
        }
        DataType::Primary { base, flags } => {
            let unsigned = flags.contains(Qualifiers::UNSIGNED);
            match base {
                TokenKind::Char => {
                    if unsigned {
                        MirType::U8
                    } else {
                        MirType::I8
                    }
                }
                TokenKind::Int => {
                    let (signed, uns) = if flags.contains(Qualifiers::SHORT) {
                        (MirType::I16, MirType::U16)
                    } else if flags.contains(Qualifiers::LONG) || flags.contains(Qualifiers::LONG_LONG) {
                        (MirType::I64, MirType::U64)
                    } else {
                        (MirType::I32, MirType::U32)
                    };
                    if unsigned {
                        uns
                    } else {
                        signed
                    }
                }
                TokenKind::Float => MirType::F32,
                // long double is not supported; double is IEEE binary64
                TokenKind::Double => MirType::F64,
                other => unreachable!("primary type on token {other:?}"),
            }
        }
        DataType::Struct { name } | DataType::Union { name } => {
            let composite = scopes
                .find_composite(scope, name)
                .unwrap_or_else(|| panic!("layout queried for undefined composite {name}"));
            MirType {
                kind: MirTypeKind::Struct,
                size: composite.size,
                alignment: composite.alignment.max(1),
            }
        }
        DataType::Void => MirType::VOID,
        DataType::Error => MirType::I32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_powers_of_two() {
        assert_eq!(align_up(0u64, 8), 0);
        assert_eq!(align_up(1u64, 8), 8);
        assert_eq!(align_up(9u64, 8), 16);
        assert_eq!(align_up(12u64, 16), 16);
    }

    #[test]
    fn integer_widths_are_machine_lowered() {
        let scopes = Scopes::new();
        let global = ScopeId(u32::MAX); // never dereferenced for primaries
        let int = DataType::int();
        assert_eq!(lower_type(&int, &scopes, global), MirType::I32);
        assert_eq!(lower_type(&DataType::long_long(), &scopes, global), MirType::I64);
        assert_eq!(
            lower_type(&DataType::pointer_to(int), &scopes, global),
            MirType::PTR
        );
    }
}

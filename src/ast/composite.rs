//! Struct and union descriptors. Offsets and sizes are filled in by a single
//! layout pass once a scope's declarations are known.

use indexmap::IndexMap;
use serde::Serialize;

use super::datatype::DataType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CompositeKind {
    Struct,
    Union,
}

#[derive(Clone, Debug)]
pub struct Member {
    pub ty: DataType,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct Composite {
    pub kind: CompositeKind,
    pub name: String,
    pub defined: bool,
    pub size: u64,
    pub alignment: u64,
    /// Declaration order is layout order.
    pub members: IndexMap<String, Member>,
}

impl Composite {
    pub fn declared(kind: CompositeKind, name: &str) -> Self {
        Composite {
            kind,
            name: name.to_string(),
            defined: false,
            size: 0,
            alignment: 0,
            members: IndexMap::new(),
        }
    }

    pub fn layout(&self) -> CompositeLayout {
        CompositeLayout {
            size: self.size,
            alignment: self.alignment,
        }
    }
}

/// Summary used by tests and dumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CompositeLayout {
    pub size: u64,
    pub alignment: u64,
}

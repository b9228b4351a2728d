//! Nested scope records. Scopes live in an arena and refer to their parent
//! by id, so the child->parent edge never owns anything.

use indexmap::IndexMap;

use crate::arena::Arena;

use super::composite::Composite;
use super::datatype::DataType;

/// Generous cap; a translation unit hitting it is a runaway input.
const SCOPE_LIMIT: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScopeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    If,
    While,
    For,
    Unnamed,
}

#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    /// Function name for `ScopeKind::Function` bodies.
    pub func_name: Option<String>,
    pub symbols: IndexMap<String, DataType>,
    pub composites: IndexMap<String, Composite>,
}

impl Scope {
    pub fn new(kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Scope {
            kind,
            parent,
            func_name: None,
            symbols: IndexMap::new(),
            composites: IndexMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct Scopes {
    arena: Arena<Scope>,
}

impl Scopes {
    pub fn new() -> Self {
        Scopes {
            arena: Arena::with_limit(SCOPE_LIMIT),
        }
    }

    pub fn push(&mut self, scope: Scope) -> ScopeId {
        ScopeId(self.arena.alloc(scope))
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        self.arena.get(id.0)
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        self.arena.get_mut(id.0)
    }

    /// Walks the scope chain for the declaring scope of `name`.
    pub fn find_symbol(&self, from: ScopeId, name: &str) -> Option<(ScopeId, &DataType)> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(ty) = scope.symbols.get(name) {
                return Some((id, ty));
            }
            current = scope.parent;
        }
        None
    }

    /// Finds the defining declaration of a composite; a forward declaration
    /// in an inner scope does not shadow an outer definition.
    pub fn find_composite(&self, from: ScopeId, name: &str) -> Option<&Composite> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.get(id);
            if let Some(composite) = scope.composites.get(name) {
                if composite.defined {
                    return Some(composite);
                }
            }
            current = scope.parent;
        }
        None
    }

    pub fn parent_function(&self, from: ScopeId) -> Option<&Scope> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.get(id);
            if scope.kind == ScopeKind::Function {
                return Some(scope);
            }
            current = scope.parent;
        }
        None
    }

    /// True when the scope sits inside a loop body of its function.
    pub fn in_loop(&self, from: ScopeId) -> bool {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.get(id);
            match scope.kind {
                ScopeKind::While | ScopeKind::For => return true,
                ScopeKind::Function | ScopeKind::Global => return false,
                _ => {}
            }
            current = scope.parent;
        }
        false
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes::new()
    }
}

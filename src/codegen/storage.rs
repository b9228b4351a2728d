//! Stack frame bookkeeping: where each name in scope lives.

use indexmap::IndexMap;

use super::regalloc::Reg;

/// A name resolves to a register, a frame slot, or a link-time symbol.
#[derive(Clone, Debug)]
pub enum StorageKind {
    Register { reg: Reg },
    /// Distance below the frame base; the slot covers
    /// `[frame_base - address, frame_base - address + size)`.
    Memory { address: u64 },
    Global { label: String },
}

#[derive(Clone, Debug)]
pub struct StorageInfo {
    pub kind: StorageKind,
    pub size: u64,
}

/// Per-scope storage map; parents are arena ids, mirroring the MIR scope
/// chain.
#[derive(Debug)]
pub struct ScopeInfo {
    pub parent: Option<u32>,
    /// Signed offset from the frame pointer at which this scope's
    /// allocations begin.
    pub frame_base: u64,
    pub storage: IndexMap<String, StorageInfo>,
}

/// Bumps a per-function offset; slot addresses grow downwards from fp.
#[derive(Debug, Default)]
pub struct StackAllocator {
    sp: u64,
}

impl StackAllocator {
    pub fn new() -> Self {
        StackAllocator { sp: 0 }
    }

    pub fn allocate(&mut self, size: u64) -> u64 {
        let base = self.sp;
        self.sp += size;
        base
    }

    pub fn deallocate(&mut self, size: u64) {
        self.sp -= size;
    }

    pub fn current(&self) -> u64 {
        self.sp
    }
}

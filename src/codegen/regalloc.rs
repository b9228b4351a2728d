//! RV64 register file model. Virtual registers are opaque ids resolved to
//! the first free architectural register of the requested class; snapshots
//! capture caller-saved occupancy around calls.

use bitflags::bitflags;

bitflags! {
    pub struct RegClass: u32 {
        const TEMPORARY = 1;
        const SAVED = 1 << 1;
        const ARGUMENTS = 1 << 2;
        const FLOAT = 1 << 3;
        const CALLER_SAVED = Self::TEMPORARY.bits | Self::ARGUMENTS.bits;
        const ANY = Self::CALLER_SAVED.bits | Self::SAVED.bits;
    }
}

pub const REG_COUNT: usize = 64;

/// x0..x31 then f0..f31.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhysReg(pub usize);

pub const REG_ZERO: PhysReg = PhysReg(0);
pub const REG_RA: PhysReg = PhysReg(1);
pub const REG_SP: PhysReg = PhysReg(2);
pub const REG_FP: PhysReg = PhysReg(8);
pub const REG_A0: PhysReg = PhysReg(10);
pub const REG_FA0: PhysReg = PhysReg(42);

pub const REG_NAMES: [&str; REG_COUNT] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "fp", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6", "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0",
    "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7",
    "fs8", "fs9", "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

pub fn reg_name(reg: PhysReg) -> &'static str {
    REG_NAMES[reg.0]
}

pub fn class_of(reg: PhysReg) -> RegClass {
    match reg.0 {
        0..=4 => RegClass::empty(),
        5..=7 | 28..=31 => RegClass::TEMPORARY,
        8..=9 | 18..=27 => RegClass::SAVED,
        10..=17 => RegClass::ARGUMENTS,
        32..=39 | 60..=63 => RegClass::TEMPORARY | RegClass::FLOAT,
        40..=41 | 50..=59 => RegClass::SAVED | RegClass::FLOAT,
        42..=49 => RegClass::ARGUMENTS | RegClass::FLOAT,
        _ => unreachable!("register index {}", reg.0),
    }
}

/// Integer then float temporaries, in resolution order.
const INT_TEMPORARIES: [usize; 7] = [5, 6, 7, 28, 29, 30, 31];
const FLOAT_TEMPORARIES: [usize; 12] = [32, 33, 34, 35, 36, 37, 38, 39, 60, 61, 62, 63];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reg {
    pub id: u64,
    pub class: RegClass,
}

impl Reg {
    pub fn is_physical(&self) -> bool {
        self.id < REG_COUNT as u64
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RegInfo {
    pub occupied: bool,
    pub vreg: u64,
}

/// Occupancy of one register class, captured around calls.
#[derive(Clone, Copy, Debug)]
pub struct RegisterState {
    pub regs: [RegInfo; REG_COUNT],
}

impl Default for RegisterState {
    fn default() -> Self {
        RegisterState {
            regs: [RegInfo::default(); REG_COUNT],
        }
    }
}

pub struct RegisterAllocator {
    regs: [RegInfo; REG_COUNT],
    next_virtual: u64,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        RegisterAllocator {
            regs: [RegInfo::default(); REG_COUNT],
            next_virtual: REG_COUNT as u64,
        }
    }

    /// Reserves a specific architectural register.
    pub fn alloc_physical(&mut self, reg: PhysReg) -> Reg {
        assert!(
            !self.regs[reg.0].occupied,
            "register {} is already occupied",
            reg_name(reg)
        );
        self.regs[reg.0].occupied = true;
        self.regs[reg.0].vreg = 0;
        Reg {
            id: reg.0 as u64,
            class: class_of(reg),
        }
    }

    pub fn alloc_virtual(&mut self, class: RegClass) -> Reg {
        let id = self.next_virtual;
        self.next_virtual += 1;
        Reg { id, class }
    }

    /// Resolves to an architectural register, assigning the first free
    /// temporary of the requested file on first use. Pressure is bounded by
    /// deepest-first expression emission; running dry is a compiler bug.
    pub fn resolve(&mut self, reg: Reg) -> PhysReg {
        if reg.is_physical() {
            return PhysReg(reg.id as usize);
        }
        for i in 0..REG_COUNT {
            if self.regs[i].vreg == reg.id {
                return PhysReg(i);
            }
        }
        let candidates: &[usize] = if reg.class.contains(RegClass::FLOAT) {
            &FLOAT_TEMPORARIES
        } else {
            &INT_TEMPORARIES
        };
        for &i in candidates {
            if !self.regs[i].occupied {
                self.regs[i].occupied = true;
                self.regs[i].vreg = reg.id;
                return PhysReg(i);
            }
        }
        panic!("out of temporary registers");
    }

    pub fn free(&mut self, reg: Reg) {
        if reg.is_physical() {
            self.regs[reg.id as usize] = RegInfo::default();
            return;
        }
        for info in self.regs.iter_mut() {
            if info.vreg == reg.id {
                *info = RegInfo::default();
            }
        }
    }

    pub fn is_occupied(&self, reg: PhysReg) -> bool {
        self.regs[reg.0].occupied
    }

    /// Captures the occupancy of every register in the masked classes.
    pub fn state(&self, mask: RegClass) -> RegisterState {
        let mut state = RegisterState::default();
        let want_float = mask.contains(RegClass::FLOAT);
        for i in 0..REG_COUNT {
            let class = class_of(PhysReg(i));
            if class.contains(RegClass::FLOAT) != want_float {
                continue;
            }
            if (class & mask & RegClass::ANY).is_empty() {
                continue;
            }
            state.regs[i] = self.regs[i];
        }
        state
    }

    /// Frees every register the snapshot saw occupied.
    pub fn clear(&mut self, state: &RegisterState) {
        for i in 0..REG_COUNT {
            if state.regs[i].occupied {
                self.regs[i] = RegInfo::default();
            }
        }
    }

    /// Re-imposes a snapshot's occupancy.
    pub fn restore(&mut self, state: &RegisterState) {
        for i in 0..REG_COUNT {
            if state.regs[i].occupied {
                self.regs[i] = state.regs[i];
            }
        }
    }
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        RegisterAllocator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_registers_resolve_to_free_temporaries() {
        let mut regs = RegisterAllocator::new();
        let a = regs.alloc_virtual(RegClass::TEMPORARY);
        let b = regs.alloc_virtual(RegClass::TEMPORARY);
        let pa = regs.resolve(a);
        let pb = regs.resolve(b);
        assert_ne!(pa, pb);
        assert_eq!(reg_name(pa), "t0");
        assert_eq!(reg_name(pb), "t1");
        // resolving again is stable
        assert_eq!(regs.resolve(a), pa);
        regs.free(a);
        assert!(!regs.is_occupied(pa));
        // freed register is handed out again
        let c = regs.alloc_virtual(RegClass::TEMPORARY);
        assert_eq!(regs.resolve(c), pa);
    }

    #[test]
    fn float_class_uses_the_float_file() {
        let mut regs = RegisterAllocator::new();
        let f = regs.alloc_virtual(RegClass::TEMPORARY | RegClass::FLOAT);
        assert_eq!(reg_name(regs.resolve(f)), "ft0");
    }

    #[test]
    fn occupied_iff_some_live_virtual_maps_to_it() {
        let mut regs = RegisterAllocator::new();
        let a = regs.alloc_virtual(RegClass::TEMPORARY);
        let pa = regs.resolve(a);
        assert!(regs.is_occupied(pa));
        regs.free(a);
        for i in 0..REG_COUNT {
            assert!(!regs.is_occupied(PhysReg(i)));
        }
    }

    #[test]
    fn snapshot_clear_restore_round_trip() {
        let mut regs = RegisterAllocator::new();
        let a0 = regs.alloc_physical(REG_A0);
        let t = regs.alloc_virtual(RegClass::TEMPORARY);
        let pt = regs.resolve(t);

        let snapshot = regs.state(RegClass::CALLER_SAVED);
        regs.clear(&snapshot);
        assert!(!regs.is_occupied(REG_A0));
        assert!(!regs.is_occupied(pt));

        regs.restore(&snapshot);
        assert!(regs.is_occupied(REG_A0));
        assert!(regs.is_occupied(pt));
        assert_eq!(regs.resolve(t), pt);

        regs.free(a0);
        regs.free(t);
    }
}

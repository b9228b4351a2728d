//! Expression emission. Every node is generated into a caller-provided
//! destination register; the deeper operand of a binary node is emitted
//! first so intermediate values never need spilling.

use crate::mir::datatype::{MirType, MirTypeKind, XLEN};
use crate::mir::{Immediate, LoadKind, MirBinaryOp, MirExpr, MirExprKind, MirUnaryOp};

use super::regalloc::{self, class_of, reg_name, PhysReg, Reg, RegClass, REG_A0, REG_FA0};
use super::storage::StorageKind;
use super::{CodeGenerator, RodataKind};

/// Integer load/store suffix: byte, half, word, double word.
pub(crate) fn int_suffix(size: u64) -> &'static str {
    match size {
        1 => "b",
        2 => "h",
        4 => "w",
        _ => "d",
    }
}

/// Float precision suffix: single or double.
pub(crate) fn float_suffix(size: u64) -> &'static str {
    match size {
        4 => "s",
        _ => "d",
    }
}

/// Integer operand suffix in float conversion instructions.
pub(crate) fn fcvt_int_suffix(size: u64) -> &'static str {
    match size {
        4 => "w",
        _ => "l",
    }
}

/// Max depth over children plus one; used to order operand emission.
fn depth(expr: &MirExpr) -> u32 {
    match &expr.kind {
        MirExprKind::AddressOf { .. }
        | MirExprKind::Leaf { .. }
        | MirExprKind::Immediate(_)
        | MirExprKind::Call { .. } => 1,
        MirExprKind::LoadAddress { base, .. } => depth(base) + 1,
        MirExprKind::Load { base, .. } => depth(base) + 1,
        MirExprKind::Store { target, value, .. } => depth(target).max(depth(value)) + 1,
        MirExprKind::Index { base, index, .. } => depth(base).max(depth(index)) + 1,
        MirExprKind::Binary { left, right, .. } => depth(left).max(depth(right)) + 1,
        MirExprKind::Unary { operand, .. } => depth(operand) + 1,
        MirExprKind::Cast { operand, .. } => depth(operand) + 1,
    }
}

/// Where an address expression bottoms out.
enum ResolvedAddress {
    /// fp-relative offset.
    Frame(i64),
    Global(String),
}

impl<'a> CodeGenerator<'a> {
    fn resolve_symbol(&self, symbol: &str) -> ResolvedAddress {
        let mut current = self.current_scope;
        while let Some(id) = current {
            let info = self.storage.get(id);
            if let Some(storage) = info.storage.get(symbol) {
                return match &storage.kind {
                    StorageKind::Memory { address } => {
                        ResolvedAddress::Frame(info.frame_base as i64 - *address as i64)
                    }
                    StorageKind::Global { label } => ResolvedAddress::Global(label.clone()),
                    StorageKind::Register { .. } => {
                        unreachable!("register-resident symbol {symbol}")
                    }
                };
            }
            current = info.parent;
        }
        unreachable!("no storage for symbol {symbol}")
    }

    /// Statically resolvable addresses skip the address register.
    fn resolve_address(&self, expr: &MirExpr) -> Option<ResolvedAddress> {
        let MirExprKind::AddressOf { of } = &expr.kind else {
            return None;
        };
        let MirExprKind::Leaf { symbol } = &of.kind else {
            unreachable!("address of a non-leaf")
        };
        Some(self.resolve_symbol(symbol))
    }

    fn load_global_address(&mut self, dest: &str, label: &str) {
        self.line(format_args!("    lui {dest}, %hi({label})"));
        self.line(format_args!("    addi {dest}, {dest}, %lo({label})"));
    }

    /// Emits the value of `expr` into `dest`.
    pub(super) fn emit_expr(&mut self, expr: &MirExpr, dest: Reg) {
        match &expr.kind {
            MirExprKind::Immediate(immediate) => self.emit_immediate(expr, immediate, dest),
            MirExprKind::Leaf { symbol } => unreachable!("bare leaf {symbol}"),
            MirExprKind::AddressOf { .. } => {
                let dest_name = reg_name(self.regs.resolve(dest));
                match self.resolve_address(expr).expect("resolvable address") {
                    ResolvedAddress::Frame(offset) => {
                        self.line(format_args!("    addi {dest_name}, fp, {offset}"));
                    }
                    ResolvedAddress::Global(label) => {
                        self.load_global_address(dest_name, &label);
                    }
                }
            }
            MirExprKind::LoadAddress { base, offset } => {
                let dest_name = reg_name(self.regs.resolve(dest));
                match self.resolve_address(base) {
                    Some(ResolvedAddress::Frame(base_offset)) => {
                        self.line(format_args!(
                            "    addi {dest_name}, fp, {}",
                            base_offset + offset
                        ));
                    }
                    Some(ResolvedAddress::Global(label)) => {
                        self.load_global_address(dest_name, &label);
                        if *offset != 0 {
                            self.line(format_args!(
                                "    addi {dest_name}, {dest_name}, {offset}"
                            ));
                        }
                    }
                    None => {
                        self.emit_expr(base, dest);
                        self.line(format_args!(
                            "    addi {dest_name}, {dest_name}, {offset}"
                        ));
                    }
                }
            }
            MirExprKind::Load {
                base,
                offset,
                size,
                kind,
            } => self.emit_load(base, *offset, *size, *kind, dest),
            MirExprKind::Store {
                target,
                value,
                offset,
                size,
            } => self.emit_store(expr, target, value, *offset, *size, dest),
            MirExprKind::Index {
                base,
                index,
                elem_size,
            } => self.emit_index(base, index, *elem_size, dest),
            MirExprKind::Binary {
                op, left, right, size,
            } => self.emit_binary(expr, *op, left, right, *size, dest),
            MirExprKind::Unary { op, operand } => self.emit_unary(expr, *op, operand, dest),
            MirExprKind::Cast { from, to, operand } => {
                self.emit_cast(*from, *to, operand, dest)
            }
            MirExprKind::Call { name, args } => self.emit_call(expr, name, args, dest),
        }
    }

    fn emit_immediate(&mut self, expr: &MirExpr, immediate: &Immediate, dest: Reg) {
        match immediate {
            Immediate::Int(value) => {
                let dest_name = reg_name(self.regs.resolve(dest));
                self.line(format_args!("    li {dest_name}, {value}"));
            }
            Immediate::Float(spelling) | Immediate::Double(spelling) => {
                let kind = if matches!(immediate, Immediate::Float(_)) {
                    RodataKind::F32
                } else {
                    RodataKind::F64
                };
                let label = self.rodata_label(kind, spelling);
                let dest_name = reg_name(self.regs.resolve(dest));

                let address = self.regs.alloc_virtual(RegClass::ANY);
                let address_name = reg_name(self.regs.resolve(address));
                self.line(format_args!("    lui {address_name}, %hi(.symbol{label})"));
                self.line(format_args!(
                    "    fl{} {dest_name}, %lo(.symbol{label})({address_name})",
                    int_suffix(expr.lowty.size)
                ));
                self.regs.free(address);
            }
            Immediate::Str(payload) => {
                let label = self.rodata_label(RodataKind::Str, payload);
                let dest_name = reg_name(self.regs.resolve(dest));
                self.line(format_args!("    lui {dest_name}, %hi(.symbol{label})"));
                self.line(format_args!(
                    "    addi {dest_name}, {dest_name}, %lo(.symbol{label})"
                ));
            }
        }
    }

    fn emit_load(&mut self, base: &MirExpr, offset: i64, size: u64, kind: LoadKind, dest: Reg) {
        assert!(
            kind != LoadKind::Mem,
            "aggregate loads are consumed by member accesses and block copies"
        );
        let prefix = if kind == LoadKind::Float { "f" } else { "" };
        let suffix = int_suffix(size);
        let dest_name = reg_name(self.regs.resolve(dest));

        match self.resolve_address(base) {
            Some(ResolvedAddress::Frame(base_offset)) => {
                self.line(format_args!(
                    "    {prefix}l{suffix} {dest_name}, {}(fp)",
                    base_offset + offset
                ));
            }
            Some(ResolvedAddress::Global(label)) => {
                let address = self.regs.alloc_virtual(RegClass::TEMPORARY);
                let address_name = reg_name(self.regs.resolve(address));
                self.load_global_address(address_name, &label);
                self.line(format_args!(
                    "    {prefix}l{suffix} {dest_name}, {offset}({address_name})"
                ));
                self.regs.free(address);
            }
            None => {
                if kind == LoadKind::Float {
                    // the address needs an integer register
                    let address = self.regs.alloc_virtual(RegClass::TEMPORARY);
                    self.emit_expr(base, address);
                    let address_name = reg_name(self.regs.resolve(address));
                    self.line(format_args!(
                        "    fl{suffix} {dest_name}, {offset}({address_name})"
                    ));
                    self.regs.free(address);
                } else {
                    self.emit_expr(base, dest);
                    self.line(format_args!(
                        "    l{suffix} {dest_name}, {offset}({dest_name})"
                    ));
                }
            }
        }
    }

    /// Address of a location expression into `dest_name`; used by the block
    /// copy, which needs raw addresses on both sides.
    fn emit_location_address(&mut self, location: &MirExpr, extra_offset: i64, dest: Reg) {
        let dest_name = reg_name(self.regs.resolve(dest));
        match self.resolve_address(location) {
            Some(ResolvedAddress::Frame(offset)) => {
                self.line(format_args!(
                    "    addi {dest_name}, fp, {}",
                    offset + extra_offset
                ));
            }
            Some(ResolvedAddress::Global(label)) => {
                self.load_global_address(dest_name, &label);
                if extra_offset != 0 {
                    self.line(format_args!(
                        "    addi {dest_name}, {dest_name}, {extra_offset}"
                    ));
                }
            }
            None => {
                self.emit_expr(location, dest);
                if extra_offset != 0 {
                    self.line(format_args!(
                        "    addi {dest_name}, {dest_name}, {extra_offset}"
                    ));
                }
            }
        }
    }

    fn emit_store(
        &mut self,
        node: &MirExpr,
        target: &MirExpr,
        value: &MirExpr,
        offset: i64,
        size: u64,
        dest: Reg,
    ) {
        // stores wider than a register copy memory in chunks
        if size > XLEN {
            let MirExprKind::Load {
                base: source_base,
                offset: source_offset,
                ..
            } = &value.kind
            else {
                unreachable!("wide store from a non-memory value")
            };
            let source = self.regs.alloc_virtual(RegClass::TEMPORARY);
            self.emit_location_address(source_base, *source_offset, source);
            let destination = self.regs.alloc_virtual(RegClass::TEMPORARY);
            self.emit_location_address(target, offset, destination);

            let chunk_reg = self.regs.alloc_virtual(RegClass::TEMPORARY);
            let source_name = reg_name(self.regs.resolve(source));
            let destination_name = reg_name(self.regs.resolve(destination));
            let chunk_name = reg_name(self.regs.resolve(chunk_reg));
            let mut copied = 0u64;
            while copied < size {
                let chunk = [8u64, 4, 2, 1]
                    .into_iter()
                    .find(|c| copied + c <= size)
                    .unwrap_or(1);
                let suffix = int_suffix(chunk);
                self.line(format_args!(
                    "    l{suffix} {chunk_name}, {copied}({source_name})"
                ));
                self.line(format_args!(
                    "    s{suffix} {chunk_name}, {copied}({destination_name})"
                ));
                copied += chunk;
            }
            self.regs.free(chunk_reg);
            self.regs.free(destination);
            self.regs.free(source);
            return;
        }

        // the stored value also lands in the destination register
        self.emit_expr(value, dest);
        let prefix = if node.lowty.is_float() { "f" } else { "" };
        let suffix = int_suffix(size);
        let dest_name = reg_name(self.regs.resolve(dest));

        match self.resolve_address(target) {
            Some(ResolvedAddress::Frame(base_offset)) => {
                self.line(format_args!(
                    "    {prefix}s{suffix} {dest_name}, {}(fp)",
                    base_offset + offset
                ));
            }
            Some(ResolvedAddress::Global(label)) => {
                let address = self.regs.alloc_virtual(RegClass::TEMPORARY);
                let address_name = reg_name(self.regs.resolve(address));
                self.load_global_address(address_name, &label);
                self.line(format_args!(
                    "    {prefix}s{suffix} {dest_name}, {offset}({address_name})"
                ));
                self.regs.free(address);
            }
            None => {
                let address = self.regs.alloc_virtual(RegClass::TEMPORARY);
                self.emit_expr(target, address);
                let address_name = reg_name(self.regs.resolve(address));
                self.line(format_args!(
                    "    {prefix}s{suffix} {dest_name}, {offset}({address_name})"
                ));
                self.regs.free(address);
            }
        }
    }

    fn emit_index(&mut self, base: &MirExpr, index: &MirExpr, elem_size: u64, dest: Reg) {
        let dest_name = reg_name(self.regs.resolve(dest));
        match self.resolve_address(base) {
            Some(ResolvedAddress::Frame(offset)) => {
                self.line(format_args!("    addi {dest_name}, fp, {offset}"));
            }
            Some(ResolvedAddress::Global(label)) => {
                self.load_global_address(dest_name, &label);
            }
            None => self.emit_expr(base, dest),
        }

        let index_reg = self.regs.alloc_virtual(RegClass::TEMPORARY);
        self.emit_expr(index, index_reg);
        let index_name = reg_name(self.regs.resolve(index_reg));

        if elem_size > 1 {
            let scale = self.regs.alloc_virtual(RegClass::TEMPORARY);
            let scale_name = reg_name(self.regs.resolve(scale));
            self.line(format_args!("    li {scale_name}, {elem_size}"));
            self.line(format_args!(
                "    mul {index_name}, {index_name}, {scale_name}"
            ));
            self.regs.free(scale);
        }

        self.line(format_args!("    add {dest_name}, {dest_name}, {index_name}"));
        self.regs.free(index_reg);
    }

    fn emit_binary(
        &mut self,
        node: &MirExpr,
        op: MirBinaryOp,
        left: &MirExpr,
        right: &MirExpr,
        size: u64,
        dest: Reg,
    ) {
        let operands_float = left.lowty.is_float();
        let dest_float = dest.class.contains(RegClass::FLOAT)
            || (dest.is_physical() && class_of(PhysReg(dest.id as usize)).contains(RegClass::FLOAT));

        // comparisons write an integer but read the operand file; when the
        // files differ the left operand takes a scratch of its own file
        let can_use_dest = operands_float == dest_float;
        let operand_class = if operands_float {
            RegClass::TEMPORARY | RegClass::FLOAT
        } else {
            RegClass::TEMPORARY
        };
        let left_reg = if can_use_dest {
            dest
        } else {
            self.regs.alloc_virtual(operand_class)
        };
        let right_reg = self.regs.alloc_virtual(operand_class);

        // deeper subtree first so the shallow one cannot evict its result
        if depth(left) < depth(right) {
            self.emit_expr(right, right_reg);
            self.emit_expr(left, left_reg);
        } else {
            self.emit_expr(left, left_reg);
            self.emit_expr(right, right_reg);
        }

        let dest_name = reg_name(self.regs.resolve(dest));
        let left_name = reg_name(self.regs.resolve(left_reg));
        let right_name = reg_name(self.regs.resolve(right_reg));
        let signed = left.lowty.is_signed();
        let fs = float_suffix(size);

        match op {
            MirBinaryOp::IAdd | MirBinaryOp::UAdd => {
                self.line(format_args!("    add {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::ISub | MirBinaryOp::USub => {
                self.line(format_args!("    sub {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IMul | MirBinaryOp::UMul => {
                self.line(format_args!("    mul {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IDiv => {
                self.line(format_args!("    div {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::UDiv => {
                self.line(format_args!("    divu {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IMod => {
                self.line(format_args!("    rem {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::UMod => {
                self.line(format_args!("    remu {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IBitAnd | MirBinaryOp::LogicalAnd => {
                self.line(format_args!("    and {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IBitOr | MirBinaryOp::LogicalOr => {
                self.line(format_args!("    or {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IBitXor => {
                self.line(format_args!("    xor {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IShiftLeft => {
                self.line(format_args!("    sll {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::IShiftRight => {
                let ins = if node.lowty.is_signed() { "sra" } else { "srl" };
                self.line(format_args!("    {ins} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::ICmpLt => {
                let ins = if signed { "slt" } else { "sltu" };
                self.line(format_args!("    {ins} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::ICmpGt => {
                self.line(format_args!("    sub {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    sgtz {dest_name}, {dest_name}"));
            }
            MirBinaryOp::ICmpLe => {
                self.line(format_args!("    sub {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    sgtz {dest_name}, {dest_name}"));
                self.line(format_args!("    xori {dest_name}, {dest_name}, 1"));
            }
            MirBinaryOp::ICmpGe => {
                let ins = if signed { "slt" } else { "sltu" };
                self.line(format_args!("    {ins} {dest_name}, {right_name}, {left_name}"));
            }
            MirBinaryOp::ICmpEq => {
                self.line(format_args!("    sub {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    seqz {dest_name}, {dest_name}"));
            }
            MirBinaryOp::ICmpNe => {
                self.line(format_args!("    sub {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    snez {dest_name}, {dest_name}"));
            }
            MirBinaryOp::FAdd => {
                self.line(format_args!("    fadd.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FSub => {
                self.line(format_args!("    fsub.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FMul => {
                self.line(format_args!("    fmul.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FDiv => {
                self.line(format_args!("    fdiv.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FCmpLt => {
                self.line(format_args!("    flt.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FCmpGt => {
                self.line(format_args!("    fle.{fs} {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    xori {dest_name}, {dest_name}, 1"));
            }
            MirBinaryOp::FCmpLe => {
                self.line(format_args!("    fle.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FCmpGe => {
                self.line(format_args!("    flt.{fs} {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    xori {dest_name}, {dest_name}, 1"));
            }
            MirBinaryOp::FCmpEq => {
                self.line(format_args!("    feq.{fs} {dest_name}, {left_name}, {right_name}"));
            }
            MirBinaryOp::FCmpNe => {
                self.line(format_args!("    feq.{fs} {dest_name}, {left_name}, {right_name}"));
                self.line(format_args!("    xori {dest_name}, {dest_name}, 1"));
            }
        }

        if !can_use_dest {
            self.regs.free(left_reg);
        }
        self.regs.free(right_reg);
    }

    fn emit_unary(&mut self, node: &MirExpr, op: MirUnaryOp, operand: &MirExpr, dest: Reg) {
        self.emit_expr(operand, dest);
        let dest_name = reg_name(self.regs.resolve(dest));
        match op {
            MirUnaryOp::INegate => {
                self.line(format_args!("    neg {dest_name}, {dest_name}"));
            }
            MirUnaryOp::FNegate => {
                let zero = self
                    .regs
                    .alloc_virtual(RegClass::TEMPORARY | RegClass::FLOAT);
                let zero_name = reg_name(self.regs.resolve(zero));
                let fs = float_suffix(node.lowty.size);
                self.line(format_args!(
                    "    fcvt.{fs}.{} {zero_name}, zero",
                    fcvt_int_suffix(XLEN)
                ));
                self.line(format_args!(
                    "    fsub.{fs} {dest_name}, {zero_name}, {dest_name}"
                ));
                self.regs.free(zero);
            }
            MirUnaryOp::IBitNot => {
                self.line(format_args!("    not {dest_name}, {dest_name}"));
            }
            MirUnaryOp::LogicalNot => {
                self.line(format_args!("    seqz {dest_name}, {dest_name}"));
            }
        }
    }

    fn emit_cast(&mut self, from: MirType, to: MirType, operand: &MirExpr, dest: Reg) {
        if from.kind == to.kind {
            self.emit_expr(operand, dest);
            return;
        }

        let same_file = (from.is_integer() && to.is_integer())
            || (from.is_float() && to.is_float());
        let dest_float = dest.class.contains(RegClass::FLOAT)
            || (dest.is_physical() && class_of(PhysReg(dest.id as usize)).contains(RegClass::FLOAT));

        let source = if same_file {
            dest
        } else {
            // the operand lives in the opposite register file
            let class = if dest_float {
                RegClass::TEMPORARY
            } else {
                RegClass::TEMPORARY | RegClass::FLOAT
            };
            self.regs.alloc_virtual(class)
        };

        self.emit_expr(operand, source);
        let source_name = reg_name(self.regs.resolve(source));
        let dest_name = reg_name(self.regs.resolve(dest));

        if from.is_integer() {
            match to.kind {
                MirTypeKind::Bool => {
                    self.line(format_args!("    snez {dest_name}, {source_name}"));
                }
                MirTypeKind::F32 | MirTypeKind::F64 => {
                    let unsigned = if from.is_unsigned() { "u" } else { "" };
                    self.line(format_args!(
                        "    fcvt.{}.{}{unsigned} {dest_name}, {source_name}",
                        float_suffix(to.size),
                        fcvt_int_suffix(from.size)
                    ));
                }
                // sign extension is the default on RV64: integer widening
                // and narrowing within XLEN are no-ops
                _ => {}
            }
        } else if from.is_float() {
            match to.kind {
                MirTypeKind::F32 | MirTypeKind::F64 => {
                    self.line(format_args!(
                        "    fcvt.{}.{} {dest_name}, {source_name}",
                        float_suffix(to.size),
                        float_suffix(from.size)
                    ));
                }
                MirTypeKind::Bool => {
                    self.line(format_args!(
                        "    fcvt.{}.{} {dest_name}, {source_name}",
                        fcvt_int_suffix(XLEN),
                        float_suffix(from.size)
                    ));
                    self.line(format_args!("    snez {dest_name}, {dest_name}"));
                }
                _ => {
                    let unsigned = if to.is_unsigned() { "u" } else { "" };
                    self.line(format_args!(
                        "    fcvt.{}{unsigned}.{} {dest_name}, {source_name}",
                        fcvt_int_suffix(to.size),
                        float_suffix(from.size)
                    ));
                }
            }
        } else if from.kind == MirTypeKind::Array {
            assert!(
                to.is_integer(),
                "arrays only convert to integer-class values"
            );
        } else {
            unreachable!("cast from {from:?} to {to:?}");
        }

        if !same_file {
            self.regs.free(source);
        }
    }

    /// LP64D call sequence: spill live caller-saved registers, marshal the
    /// arguments into a0../fa0.., call, fetch the result, reload.
    fn emit_call(&mut self, node: &MirExpr, name: &str, args: &[MirExpr], dest: Reg) {
        let dest_phys = self.regs.resolve(dest);
        let dest_name = reg_name(dest_phys);

        let int_state = self.regs.state(RegClass::CALLER_SAVED);
        let float_state = self.regs.state(RegClass::CALLER_SAVED | RegClass::FLOAT);

        // registers to preserve around the call, the destination excepted:
        // it receives the return value anyway
        let mut saved: Vec<usize> = Vec::new();
        for i in 0..regalloc::REG_COUNT {
            if i == dest_phys.0 {
                continue;
            }
            if int_state.regs[i].occupied || float_state.regs[i].occupied {
                saved.push(i);
            }
        }

        let spill_bytes = saved.len() as u64 * XLEN;
        if !saved.is_empty() {
            self.line(format_args!("    addi sp, sp, -{spill_bytes}"));
            for (slot, &i) in saved.iter().enumerate() {
                let prefix = if i >= 32 { "f" } else { "" };
                self.line(format_args!(
                    "    {prefix}sd {}, {}(sp)",
                    regalloc::REG_NAMES[i],
                    slot as u64 * XLEN
                ));
            }
        }
        // every caller-saved register is now rewritable
        self.regs.clear(&int_state);
        self.regs.clear(&float_state);

        let mut int_args = 0usize;
        let mut float_args = 0usize;
        let mut arg_regs = Vec::with_capacity(args.len());
        for arg in args {
            let reg = if arg.lowty.is_float() {
                assert!(float_args < 8, "float arguments beyond fa7");
                let reg = self.regs.alloc_physical(PhysReg(REG_FA0.0 + float_args));
                float_args += 1;
                reg
            } else {
                assert!(int_args < 8, "integer arguments beyond a7");
                let reg = self.regs.alloc_physical(PhysReg(REG_A0.0 + int_args));
                int_args += 1;
                reg
            };
            self.emit_expr(arg, reg);
            arg_regs.push(reg);
        }

        self.line(format_args!("    call {name}"));

        for reg in arg_regs {
            self.regs.free(reg);
        }

        match node.lowty.kind {
            MirTypeKind::Void => {}
            MirTypeKind::F32 => {
                self.line(format_args!("    fmv.s {dest_name}, fa0"));
            }
            MirTypeKind::F64 => {
                self.line(format_args!("    fmv.d {dest_name}, fa0"));
            }
            _ => {
                self.line(format_args!("    mv {dest_name}, a0"));
            }
        }

        if !saved.is_empty() {
            for (slot, &i) in saved.iter().enumerate() {
                let prefix = if i >= 32 { "f" } else { "" };
                self.line(format_args!(
                    "    {prefix}ld {}, {}(sp)",
                    regalloc::REG_NAMES[i],
                    slot as u64 * XLEN
                ));
            }
            self.line(format_args!("    addi sp, sp, {spill_bytes}"));
        }

        self.regs.restore(&int_state);
        self.regs.restore(&float_state);
    }
}

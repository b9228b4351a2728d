//! MIR to RV64 assembly. Walks each function's primitive tree, allocating
//! registers on demand and laying out stack frames; emits a
//! `.rodata`/`.data`/`.text` document in GAS syntax.

pub mod regalloc;
pub mod storage;

mod expr;

use std::fmt::Write;

use indexmap::IndexMap;

use crate::arena::Arena;
use crate::lexer::number::float_value;
use crate::mir::datatype::{align_up, MirTypeKind};
use crate::mir::{
    DataDirective, LoadKind, Mir, MirExprKind, MirFunction, MirIf, MirPrimitive, MirScope,
};

use self::regalloc::{RegClass, RegisterAllocator, REG_A0, REG_FA0};
use self::storage::{ScopeInfo, StackAllocator, StorageInfo, StorageKind};

/// Read-only pool entry; the key is the literal's spelling.
#[derive(Debug)]
struct RodataEntry {
    label: u32,
    kind: RodataKind,
    payload: String,
}

#[derive(Debug, PartialEq, Eq)]
enum RodataKind {
    F32,
    F64,
    Str,
}

pub fn generate(mir: &Mir) -> String {
    CodeGenerator::new(mir).run()
}

pub(crate) struct CodeGenerator<'a> {
    mir: &'a Mir,
    regs: RegisterAllocator,
    stack: StackAllocator,
    storage: Arena<ScopeInfo>,
    current_scope: Option<u32>,
    if_labels: u32,
    /// Assembly of the function being generated.
    buffer: String,
    text: String,
    rodata: IndexMap<String, RodataEntry>,
}

impl<'a> CodeGenerator<'a> {
    fn new(mir: &'a Mir) -> Self {
        CodeGenerator {
            mir,
            regs: RegisterAllocator::new(),
            stack: StackAllocator::new(),
            storage: Arena::with_limit(1 << 16),
            current_scope: None,
            if_labels: 0,
            buffer: String::new(),
            text: String::new(),
            rodata: IndexMap::new(),
        }
    }

    fn run(mut self) -> String {
        // globals live at the root of the storage chain
        let mut root = ScopeInfo {
            parent: None,
            frame_base: 0,
            storage: IndexMap::new(),
        };
        for global in &self.mir.globals {
            let size = global
                .directives
                .iter()
                .map(|d| d.size_bytes())
                .sum::<u64>();
            root.storage.insert(
                global.name.clone(),
                StorageInfo {
                    kind: StorageKind::Global {
                        label: global.name.clone(),
                    },
                    size,
                },
            );
        }
        let root = self.storage.alloc(root);
        self.current_scope = Some(root);

        for (_, function) in &self.mir.functions {
            if function.is_extern {
                continue;
            }
            self.generate_function(function);
            self.text.push_str(&self.buffer);
            self.buffer.clear();
        }

        let mut out = String::new();
        out.push_str("    .section     .rodata\n");
        for (_, entry) in &self.rodata {
            let _ = writeln!(out, ".symbol{}:", entry.label);
            match entry.kind {
                RodataKind::F32 => {
                    let value = float_value(&entry.payload).unwrap_or(0.0) as f32;
                    let _ = writeln!(out, "    .word {}", value.to_bits());
                }
                RodataKind::F64 => {
                    let bits = float_value(&entry.payload).unwrap_or(0.0).to_bits();
                    let _ = writeln!(out, "    .word {}", bits & 0xffff_ffff);
                    let _ = writeln!(out, "    .word {}", bits >> 32);
                }
                RodataKind::Str => {
                    let _ = writeln!(out, "    .string \"{}\"", entry.payload);
                }
            }
        }

        out.push_str("    .section     .data\n");
        for global in &self.mir.globals {
            let _ = writeln!(out, "    .globl {}", global.name);
            let _ = writeln!(out, "    .balign {}", global.alignment);
            let _ = writeln!(out, "{}:", global.name);
            for directive in &global.directives {
                let _ = match directive {
                    DataDirective::Byte(v) => writeln!(out, "    .byte {v}"),
                    DataDirective::Half(v) => writeln!(out, "    .half {v}"),
                    DataDirective::Word(v) => writeln!(out, "    .word {v}"),
                    DataDirective::Dword(v) => writeln!(out, "    .dword {v}"),
                    DataDirective::Zero(n) => writeln!(out, "    .zero {n}"),
                };
            }
        }

        out.push_str("    .section     .text\n");
        out.push_str(&self.text);
        out
    }

    fn line(&mut self, args: std::fmt::Arguments) {
        let _ = self.buffer.write_fmt(args);
        self.buffer.push('\n');
    }

    fn new_if_label(&mut self) -> u32 {
        let label = self.if_labels;
        self.if_labels += 1;
        label
    }

    /// Deduplicates by spelling; returns the pool label.
    fn rodata_label(&mut self, kind: RodataKind, payload: &str) -> u32 {
        let key = match kind {
            RodataKind::F32 => format!("f:{payload}"),
            RodataKind::F64 => format!("d:{payload}"),
            RodataKind::Str => format!("s:{payload}"),
        };
        if let Some(entry) = self.rodata.get(&key) {
            return entry.label;
        }
        let label = self.rodata.len() as u32;
        self.rodata.insert(
            key,
            RodataEntry {
                label,
                kind,
                payload: payload.to_string(),
            },
        );
        label
    }

    // ---- storage scopes ---------------------------------------------------

    /// Assigns frame slots for a scope's symbols and links it into the
    /// storage chain. The caller pairs this with `exit_scope`.
    fn enter_scope(&mut self, scope: &MirScope) -> u32 {
        self.storage.push_frame().expect("storage frame depth");
        let parent = self.current_scope;
        let frame_base = parent
            .map(|p| self.storage.get(p).frame_base)
            .unwrap_or(0);

        let mut info = ScopeInfo {
            parent,
            frame_base,
            storage: IndexMap::new(),
        };
        if !scope.symbols.is_empty() {
            let base = self.stack.allocate(scope.frame_size);
            let mut offset = 0u64;
            for (name, ty) in &scope.symbols {
                offset = align_up(offset, ty.alignment.max(1));
                offset += ty.size;
                info.storage.insert(
                    name.clone(),
                    StorageInfo {
                        kind: StorageKind::Memory {
                            address: base + offset,
                        },
                        size: ty.size,
                    },
                );
            }
        }
        let id = self.storage.alloc(info);
        self.current_scope = Some(id);
        id
    }

    fn exit_scope(&mut self, scope: &MirScope) {
        let parent = self
            .current_scope
            .and_then(|id| self.storage.get(id).parent);
        self.storage.pop_frame().expect("storage frame underflow");
        self.current_scope = parent;
        self.stack.deallocate(scope.frame_size);
    }

    // ---- functions --------------------------------------------------------

    fn generate_function(&mut self, function: &MirFunction) {
        self.line(format_args!("    .globl {}", function.name));
        self.line(format_args!("{}:", function.name));
        // prologue: save the return address and the caller's frame pointer
        self.line(format_args!("    addi sp, sp, -16"));
        self.line(format_args!("    sd ra, 8(sp)"));
        self.line(format_args!("    sd fp, 0(sp)"));
        self.line(format_args!("    mv fp, sp"));

        self.enter_scope(&function.scope);
        let frame = function.scope.frame_size;
        if frame > 0 {
            self.line(format_args!("    addi sp, sp, -{frame}"));
        }

        self.spill_parameters(function);

        for primitive in &function.scope.statements {
            self.generate_primitive(primitive);
        }

        if frame > 0 {
            self.line(format_args!("    addi sp, sp, {frame}"));
        }
        self.exit_scope(&function.scope);

        self.line(format_args!(".{}_ep:", function.name));
        self.line(format_args!("    mv sp, fp"));
        self.line(format_args!("    ld fp, 0(sp)"));
        self.line(format_args!("    ld ra, 8(sp)"));
        self.line(format_args!("    addi sp, sp, 16"));
        self.line(format_args!("    ret"));
        self.buffer.push('\n');
    }

    /// LP64D: incoming scalars arrive in a0..a7/fa0..fa7 and are spilled to
    /// their reserved frame slots before the body runs.
    fn spill_parameters(&mut self, function: &MirFunction) {
        let scope_id = self.current_scope.expect("function storage scope");
        let mut next_int = 0usize;
        let mut next_float = 0usize;
        for (name, ty) in &function.params {
            let info = self.storage.get(scope_id);
            let slot = match info.storage.get(name) {
                Some(StorageInfo {
                    kind: StorageKind::Memory { address },
                    ..
                }) => info.frame_base as i64 - *address as i64,
                _ => unreachable!("parameter {name} has no frame slot"),
            };
            if ty.is_float() {
                assert!(next_float < 8, "float parameters beyond fa7");
                let reg = regalloc::reg_name(regalloc::PhysReg(REG_FA0.0 + next_float));
                next_float += 1;
                let suffix = expr::int_suffix(ty.size);
                self.line(format_args!("    fs{suffix} {reg}, {slot}(fp)"));
            } else {
                assert!(next_int < 8, "integer parameters beyond a7");
                let reg = regalloc::reg_name(regalloc::PhysReg(REG_A0.0 + next_int));
                next_int += 1;
                let suffix = expr::int_suffix(ty.size);
                self.line(format_args!("    s{suffix} {reg}, {slot}(fp)"));
            }
        }
    }

    // ---- primitives -------------------------------------------------------

    fn generate_primitive(&mut self, primitive: &MirPrimitive) {
        match primitive {
            MirPrimitive::Scope(scope) => {
                self.enter_scope(scope);
                for inner in &scope.statements {
                    self.generate_primitive(inner);
                }
                self.exit_scope(scope);
            }
            MirPrimitive::StackAlloc(size) => {
                self.line(format_args!("    addi sp, sp, -{size}"));
            }
            MirPrimitive::StackFree(size) => {
                self.line(format_args!("    addi sp, sp, {size}"));
            }
            MirPrimitive::Expr(expr) => {
                // a bare aggregate expression moves no value
                if matches!(expr.kind, MirExprKind::Load { kind: LoadKind::Mem, .. }) {
                    return;
                }
                let mask = if expr.lowty.is_float() {
                    RegClass::TEMPORARY | RegClass::FLOAT
                } else {
                    RegClass::TEMPORARY
                };
                let dest = self.regs.alloc_virtual(mask);
                self.emit_expr(expr, dest);
                self.regs.free(dest);
            }
            MirPrimitive::If(chain) => self.generate_if(chain),
            MirPrimitive::Loop(loop_node) => {
                self.line(format_args!("{}:", loop_node.start_label));

                let condition = self.regs.alloc_virtual(RegClass::TEMPORARY);
                self.emit_expr(&loop_node.condition, condition);
                let reg = regalloc::reg_name(self.regs.resolve(condition));
                self.line(format_args!(
                    "    beqz {reg}, {}",
                    loop_node.end_label
                ));
                self.regs.free(condition);

                self.generate_primitive_scope(&loop_node.scope);

                self.line(format_args!("    j {}", loop_node.start_label));
                self.line(format_args!("{}:", loop_node.end_label));
            }
            MirPrimitive::Return(return_node) => {
                let function = &self.mir.functions[&return_node.func_name];
                if let Some(value) = &return_node.value {
                    if function.return_type.kind == MirTypeKind::Void {
                        // checked earlier; nothing to materialise
                    } else if function.return_type.is_float() {
                        let fa0 = self.regs.alloc_physical(REG_FA0);
                        self.emit_expr(value, fa0);
                        self.regs.free(fa0);
                    } else {
                        let a0 = self.regs.alloc_physical(REG_A0);
                        self.emit_expr(value, a0);
                        self.regs.free(a0);
                    }
                }
                self.line(format_args!("    j .{}_ep", return_node.func_name));
            }
            MirPrimitive::Jump(label) => {
                self.line(format_args!("    j {label}"));
            }
            MirPrimitive::Label(label) => {
                self.line(format_args!("{label}:"));
            }
        }
    }

    fn generate_primitive_scope(&mut self, scope: &MirScope) {
        self.enter_scope(scope);
        for inner in &scope.statements {
            self.generate_primitive(inner);
        }
        self.exit_scope(scope);
    }

    fn generate_if(&mut self, chain: &MirIf) {
        let end = self.new_if_label();
        let mut arm = Some(chain);
        while let Some(node) = arm {
            match &node.condition {
                Some(condition) => {
                    let reg = self.regs.alloc_virtual(RegClass::TEMPORARY);
                    self.emit_expr(condition, reg);
                    let name = regalloc::reg_name(self.regs.resolve(reg));

                    let false_label = if node.next.is_some() {
                        self.new_if_label()
                    } else {
                        end
                    };
                    self.line(format_args!("    beqz {name}, .if_L{false_label}"));
                    self.regs.free(reg);

                    self.generate_primitive_scope(&node.scope);

                    if node.next.is_some() {
                        self.line(format_args!("    j .if_L{end}"));
                    }
                    self.line(format_args!(".if_L{false_label}:"));
                }
                None => {
                    self.generate_primitive_scope(&node.scope);
                    self.line(format_args!(".if_L{end}:"));
                }
            }
            arm = node.next.as_deref();
        }
    }
}

impl DataDirective {
    fn size_bytes(&self) -> u64 {
        match self {
            DataDirective::Byte(_) => 1,
            DataDirective::Half(_) => 2,
            DataDirective::Word(_) => 4,
            DataDirective::Dword(_) => 8,
            DataDirective::Zero(n) => *n,
        }
    }
}

//! AST to MIR lowering. Every variable access becomes an explicit load,
//! every assignment a store whose left side is an address, and implicit
//! conversions become cast nodes. Lowering assumes a context-checked tree;
//! a broken invariant here is a compiler bug and aborts.

use indexmap::IndexMap;

use crate::ast::composite::CompositeKind;
use crate::ast::datatype::{resultant_type, DataType, Qualifiers};
use crate::ast::scope::{ScopeId, Scopes};
use crate::ast::{
    Ast, Block, DeclInfo, Function, IfNode, Node, Number, SizeOfArg, Subexpr,
};
use crate::diag;
use crate::lexer::number::{char_value, integer_value};
use crate::lexer::token::{Token, TokenKind};
use crate::SourceFile;

use super::datatype::{align_up, alignment_of_type, lower_type, size_of_type, MirType, MirTypeKind, XLEN};
use super::fold::const_value;
use super::{
    DataDirective, GlobalDef, Immediate, Label, LoadKind, Mir, MirBinaryOp, MirExpr, MirExprKind,
    MirFunction, MirIf, MirLoop, MirPrimitive, MirReturn, MirScope, MirUnaryOp,
};

pub struct LowerOutcome {
    pub mir: Mir,
    pub errors: usize,
}

pub fn lower(ast: &mut Ast, source: &SourceFile) -> LowerOutcome {
    let Ast {
        global,
        functions,
        scopes,
    } = ast;

    let mut lowerer = Lowerer {
        scopes,
        functions,
        source,
        labels: 0,
        errors: 0,
        loops: Vec::new(),
        frames: Vec::new(),
    };

    lowerer.compute_layouts(global.scope);
    let globals = lowerer.lower_globals(global);

    let mut mir_functions = IndexMap::new();
    for (name, function) in lowerer.functions.iter() {
        let return_type = lowerer.low(&function.return_type, global.scope);
        if return_type.kind == MirTypeKind::Struct {
            lowerer.errors += 1;
            let message = if return_type.size > 2 * XLEN {
                "struct return larger than two registers is not supported"
            } else {
                "struct return is not supported"
            };
            diag::error(
                &source.name,
                function.name.line,
                function.name.col,
                format_args!("{message}"),
            );
        }
        mir_functions.insert(name.clone(), (function, return_type));
    }

    let mut out = IndexMap::new();
    for (name, (function, return_type)) in mir_functions {
        let params: Vec<(String, MirType)> = function
            .params
            .iter()
            .map(|p| {
                let low = lower_type(&p.ty, lowerer.scopes, global.scope);
                (p.name.splice.of(&source.text).to_string(), low)
            })
            .collect();
        for (_, low) in &params {
            if low.kind == MirTypeKind::Struct {
                lowerer.errors += 1;
                diag::error(
                    &source.name,
                    function.name.line,
                    function.name.col,
                    format_args!("struct parameters are not supported"),
                );
            }
        }
        let scope = match &function.body {
            Some(body) => lowerer.lower_block(body, true),
            None => MirScope::new(),
        };
        out.insert(
            name,
            MirFunction {
                name: function.name.splice.of(&source.text).to_string(),
                return_type,
                params,
                is_extern: function.is_extern,
                scope,
            },
        );
    }

    LowerOutcome {
        mir: Mir {
            functions: out,
            globals,
        },
        errors: lowerer.errors,
    }
}

struct Lowerer<'a> {
    scopes: &'a mut Scopes,
    functions: &'a IndexMap<String, Function>,
    source: &'a SourceFile,
    labels: u32,
    errors: usize,
    /// (continue target, break target, frame depth) of enclosing loops.
    loops: Vec<(Label, Label, usize)>,
    /// Frame sizes of the scopes currently being lowered; `break` and
    /// `continue` release the frames their jump skips.
    frames: Vec<u64>,
}

impl<'a> Lowerer<'a> {
    fn text(&self, token: Token) -> &'a str {
        token.splice.of(&self.source.text)
    }

    fn error_at(&mut self, token: Token, message: std::fmt::Arguments) {
        self.errors += 1;
        diag::error(&self.source.name, token.line, token.col, message);
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;
        label
    }

    fn low(&self, ty: &DataType, scope: ScopeId) -> MirType {
        lower_type(ty, self.scopes, scope)
    }

    fn symbol_type(&self, scope: ScopeId, name: &str) -> DataType {
        self.scopes
            .find_symbol(scope, name)
            .map(|(_, ty)| ty.clone())
            .unwrap_or_else(|| unreachable!("lowering unresolved symbol {name}"))
    }

    fn member_info(&self, scope: ScopeId, composite: &str, member: &str) -> (DataType, u64) {
        let composite = self
            .scopes
            .find_composite(scope, composite)
            .unwrap_or_else(|| unreachable!("lowering undefined composite {composite}"));
        let member = composite
            .members
            .get(member)
            .unwrap_or_else(|| unreachable!("lowering unknown member {member}"));
        (member.ty.clone(), member.offset)
    }

    // ---- layout -----------------------------------------------------------

    /// Fills in member offsets, sizes and alignments for every composite
    /// declared in a scope. Unions lay all members at offset zero.
    fn compute_layouts(&mut self, scope: ScopeId) {
        let names: Vec<String> = self.scopes.get(scope).composites.keys().cloned().collect();
        for name in names {
            let (kind, defined, member_list) = {
                let composite = self.scopes.get(scope).composites.get(&name).unwrap();
                (
                    composite.kind,
                    composite.defined,
                    composite
                        .members
                        .iter()
                        .map(|(member, info)| (member.clone(), info.ty.clone()))
                        .collect::<Vec<_>>(),
                )
            };
            if !defined {
                continue;
            }

            let mut offset = 0u64;
            let mut alignment = 1u64;
            let mut offsets = Vec::with_capacity(member_list.len());
            for (_, ty) in &member_list {
                let size = size_of_type(ty, self.scopes, scope);
                let align = alignment_of_type(ty, self.scopes, scope).max(1);
                match kind {
                    CompositeKind::Struct => {
                        offset = align_up(offset, align);
                        offsets.push(offset);
                        offset += size;
                    }
                    CompositeKind::Union => {
                        offsets.push(0);
                        offset = offset.max(size);
                    }
                }
                alignment = alignment.max(align);
            }
            let size = align_up(offset, alignment);

            let composite = self
                .scopes
                .get_mut(scope)
                .composites
                .get_mut(&name)
                .unwrap();
            for ((member, _), member_offset) in member_list.iter().zip(offsets) {
                composite.members.get_mut(member).unwrap().offset = member_offset;
            }
            composite.size = size;
            composite.alignment = alignment;
        }
    }

    // ---- statements -------------------------------------------------------

    fn lower_block(&mut self, block: &Block, is_function_body: bool) -> MirScope {
        let scope = block.scope;
        self.compute_layouts(scope);

        let mut mir_scope = MirScope::new();
        let symbols: Vec<(String, DataType)> = self
            .scopes
            .get(scope)
            .symbols
            .iter()
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();
        let mut frame = 0u64;
        for (name, ty) in &symbols {
            let low = self.low(ty, scope);
            frame = align_up(frame, low.alignment.max(1)) + low.size;
            mir_scope.symbols.insert(name.clone(), low);
        }
        mir_scope.frame_size = align_up(frame, 16);

        let mut statements = Vec::new();
        // the function-level frame is part of the prologue, emitted by the
        // code generator; nested scopes adjust sp explicitly
        if !is_function_body && mir_scope.frame_size > 0 {
            statements.push(MirPrimitive::StackAlloc(mir_scope.frame_size));
        }
        self.frames.push(if is_function_body { 0 } else { mir_scope.frame_size });
        for node in &block.statements {
            self.lower_node(node, scope, &mut statements);
        }
        self.frames.pop();
        if !is_function_body && mir_scope.frame_size > 0 {
            statements.push(MirPrimitive::StackFree(mir_scope.frame_size));
        }
        mir_scope.statements = statements;
        mir_scope
    }

    fn lower_node(&mut self, node: &Node, scope: ScopeId, out: &mut Vec<MirPrimitive>) {
        match node {
            Node::Declaration(declaration) => {
                for decl in &declaration.decls {
                    self.lower_declaration(decl, scope, out);
                }
            }
            Node::Subexpr(subexpr) => {
                let expr = self.lower_subexpr(subexpr, scope);
                out.push(MirPrimitive::Expr(expr));
            }
            Node::Block(block) => {
                let inner = self.lower_block(block, false);
                out.push(MirPrimitive::Scope(inner));
            }
            Node::If(if_node) => {
                let chain = self.lower_if(if_node, scope);
                out.push(MirPrimitive::If(chain));
            }
            Node::While(while_node) => {
                let start_label = self.new_label();
                let update_label = self.new_label();
                let end_label = self.new_label();
                let condition = self.lower_subexpr(&while_node.condition, scope);

                self.loops
                    .push((update_label, end_label, self.frames.len()));
                let mut body = self.lower_block(&while_node.body, false);
                self.loops.pop();

                // continue lands just before the scope's stack release
                insert_before_stack_free(&mut body, vec![MirPrimitive::Label(update_label)]);

                out.push(MirPrimitive::Loop(MirLoop {
                    condition,
                    scope: body,
                    start_label,
                    end_label,
                }));
            }
            Node::For(for_node) => {
                let body_scope = for_node.body.scope;
                // the init expression runs exactly once, ahead of the loop
                let init = self.lower_subexpr(&for_node.init, body_scope);

                let start_label = self.new_label();
                let update_label = self.new_label();
                let end_label = self.new_label();
                let condition = self.lower_subexpr(&for_node.condition, body_scope);

                self.loops
                    .push((update_label, end_label, self.frames.len()));
                let mut body = self.lower_block(&for_node.body, false);
                self.loops.pop();

                let update = self.lower_subexpr(&for_node.update, body_scope);
                insert_before_stack_free(
                    &mut body,
                    vec![
                        MirPrimitive::Label(update_label),
                        MirPrimitive::Expr(update),
                    ],
                );

                out.push(MirPrimitive::Expr(init));
                out.push(MirPrimitive::Loop(MirLoop {
                    condition,
                    scope: body,
                    start_label,
                    end_label,
                }));
            }
            Node::Return(return_node) => {
                let func = self
                    .scopes
                    .parent_function(scope)
                    .and_then(|s| s.func_name.clone())
                    .unwrap_or_else(|| unreachable!("return outside of a function"));
                let value = return_node.value.as_ref().map(|value| {
                    let lowered = self.lower_subexpr(value, scope);
                    let return_type = self.functions[&func].return_type.clone();
                    self.cast_to(lowered, &return_type, scope)
                });
                out.push(MirPrimitive::Return(MirReturn {
                    value,
                    func_name: func,
                }));
            }
            Node::Break(_) => {
                let (_, end, depth) = *self.loops.last().expect("break outside of a loop");
                // release the frames of every scope the jump leaves
                let unwind: u64 = self.frames[depth..].iter().sum();
                if unwind > 0 {
                    out.push(MirPrimitive::StackFree(unwind));
                }
                out.push(MirPrimitive::Jump(end));
            }
            Node::Continue(_) => {
                let (update, _, depth) = *self.loops.last().expect("continue outside of a loop");
                // the continue target sits inside the loop body, ahead of
                // that scope's own release
                let unwind: u64 = self
                    .frames
                    .get(depth + 1..)
                    .map(|frames| frames.iter().sum())
                    .unwrap_or(0);
                if unwind > 0 {
                    out.push(MirPrimitive::StackFree(unwind));
                }
                out.push(MirPrimitive::Jump(update));
            }
            Node::Error => {}
        }
    }

    fn lower_if(&mut self, if_node: &IfNode, scope: ScopeId) -> MirIf {
        let condition = if_node
            .condition
            .as_ref()
            .map(|condition| self.lower_subexpr(condition, scope));
        let body = self.lower_block(&if_node.body, false);
        let next = if_node
            .next
            .as_ref()
            .map(|next| Box::new(self.lower_if(next, scope)));
        MirIf {
            condition,
            scope: body,
            next,
        }
    }

    fn lower_declaration(&mut self, decl: &DeclInfo, scope: ScopeId, out: &mut Vec<MirPrimitive>) {
        let Some(init) = &decl.init else { return };
        let name = self.text(decl.name).to_string();

        if let Subexpr::InitList { values, .. } = init {
            self.lower_init_list(&name, &decl.ty, 0, values, scope, out);
            return;
        }

        let value = self.lower_subexpr(init, scope);
        let value = self.cast_to(value, &decl.ty, scope);
        let low = self.low(&decl.ty, scope);
        let target = self.address_of_symbol(&name, &decl.ty);
        out.push(MirPrimitive::Expr(MirExpr {
            kind: MirExprKind::Store {
                target: Box::new(target),
                value: Box::new(value),
                offset: 0,
                size: low.size,
            },
            ty: decl.ty.clone(),
            lowty: low,
        }));
    }

    /// Element/member stores for `= { ... }` initializers.
    fn lower_init_list(
        &mut self,
        name: &str,
        target: &DataType,
        base_offset: i64,
        values: &[Subexpr],
        scope: ScopeId,
        out: &mut Vec<MirPrimitive>,
    ) {
        match target {
            DataType::Array { of, .. } => {
                let elem_low = self.low(of, scope);
                for (index, value) in values.iter().enumerate() {
                    let offset = base_offset + index as i64 * elem_low.size as i64;
                    self.lower_init_value(name, of, offset, value, scope, out);
                }
            }
            DataType::Struct { name: composite } | DataType::Union { name: composite } => {
                let members: Vec<(DataType, u64)> = {
                    let composite = self
                        .scopes
                        .find_composite(scope, composite)
                        .expect("initializer for undefined composite");
                    composite
                        .members
                        .values()
                        .map(|m| (m.ty.clone(), m.offset))
                        .collect()
                };
                for (value, (member_ty, offset)) in values.iter().zip(members) {
                    self.lower_init_value(
                        name,
                        &member_ty,
                        base_offset + offset as i64,
                        value,
                        scope,
                        out,
                    );
                }
            }
            _ => {
                if let Some(value) = values.first() {
                    self.lower_init_value(name, target, base_offset, value, scope, out);
                }
            }
        }
    }

    fn lower_init_value(
        &mut self,
        name: &str,
        target: &DataType,
        offset: i64,
        value: &Subexpr,
        scope: ScopeId,
        out: &mut Vec<MirPrimitive>,
    ) {
        if let Subexpr::InitList { values, .. } = value {
            self.lower_init_list(name, target, offset, values, scope, out);
            return;
        }
        let lowered = self.lower_subexpr(value, scope);
        let lowered = self.cast_to(lowered, target, scope);
        let low = self.low(target, scope);
        let address = self.address_of_symbol(name, target);
        out.push(MirPrimitive::Expr(MirExpr {
            kind: MirExprKind::Store {
                target: Box::new(address),
                value: Box::new(lowered),
                offset,
                size: low.size,
            },
            ty: target.clone(),
            lowty: low,
        }));
    }

    // ---- globals ----------------------------------------------------------

    fn lower_globals(&mut self, global: &Block) -> Vec<GlobalDef> {
        let mut globals = Vec::new();
        for node in &global.statements {
            let declaration = match node {
                Node::Declaration(declaration) => declaration,
                Node::Error => continue,
                other => {
                    if let Some(token) = statement_token(other) {
                        self.error_at(
                            token,
                            format_args!("statement outside of a function"),
                        );
                    } else {
                        self.errors += 1;
                        diag::error(
                            &self.source.name,
                            0,
                            0,
                            format_args!("statement outside of a function"),
                        );
                    }
                    continue;
                }
            };
            for decl in &declaration.decls {
                if decl.ty.flags().contains(Qualifiers::EXTERN) {
                    continue;
                }
                let low = self.low(&decl.ty, global.scope);
                let name = self.text(decl.name).to_string();
                let directives = self.global_directives(decl, low, global.scope);
                globals.push(GlobalDef {
                    name,
                    alignment: low.alignment.max(1),
                    directives,
                });
            }
        }
        globals
    }

    fn global_directives(
        &mut self,
        decl: &DeclInfo,
        low: MirType,
        scope: ScopeId,
    ) -> Vec<DataDirective> {
        let Some(init) = &decl.init else {
            return vec![DataDirective::Zero(low.size)];
        };

        match (&decl.ty, init) {
            (DataType::Array { of, count }, Subexpr::InitList { values, .. }) => {
                let elem_low = self.low(of, scope);
                let mut directives = Vec::new();
                for value in values {
                    match self.scalar_directive(value, elem_low) {
                        Some(directive) => directives.extend(directive),
                        None => {
                            self.error_at(
                                decl.name,
                                format_args!("global initializer is not a constant"),
                            );
                            return vec![DataDirective::Zero(low.size)];
                        }
                    }
                }
                let initialised = values.len() as u64 * elem_low.size;
                if initialised < low.size {
                    directives.push(DataDirective::Zero(low.size - initialised));
                }
                directives
            }
            (_, init) => match self.scalar_directive(init, low) {
                Some(directives) => directives,
                None => {
                    self.error_at(
                        decl.name,
                        format_args!("global initializer is not a constant"),
                    );
                    vec![DataDirective::Zero(low.size)]
                }
            },
        }
    }

    fn scalar_directive(&self, value: &Subexpr, low: MirType) -> Option<Vec<DataDirective>> {
        let number = const_value(value, &self.source.text)?;
        if low.is_float() {
            let double = match number {
                Number::Int(v) => v as f64,
                Number::Float(v) => v as f64,
                Number::Double(v) => v,
            };
            return Some(if low.size == 4 {
                vec![DataDirective::Word((double as f32).to_bits() as i64)]
            } else {
                let bits = double.to_bits();
                vec![
                    DataDirective::Word((bits & 0xffff_ffff) as i64),
                    DataDirective::Word((bits >> 32) as i64),
                ]
            });
        }
        let int = match number {
            Number::Int(v) => v,
            Number::Float(v) => v as i64,
            Number::Double(v) => v as i64,
        };
        Some(match low.size {
            1 => vec![DataDirective::Byte(int)],
            2 => vec![DataDirective::Half(int)],
            4 => vec![DataDirective::Word(int)],
            _ => vec![DataDirective::Dword(int)],
        })
    }

    // ---- expressions ------------------------------------------------------

    fn address_of_symbol(&self, name: &str, ty: &DataType) -> MirExpr {
        let leaf = MirExpr {
            kind: MirExprKind::Leaf {
                symbol: name.to_string(),
            },
            ty: ty.clone(),
            lowty: MirType::PTR,
        };
        MirExpr {
            kind: MirExprKind::AddressOf { of: Box::new(leaf) },
            ty: DataType::Address {
                to: Box::new(ty.clone()),
            },
            lowty: MirType::PTR,
        }
    }

    fn load_kind(low: MirType) -> LoadKind {
        if low.is_float() {
            LoadKind::Float
        } else if matches!(low.kind, MirTypeKind::Struct | MirTypeKind::Array) {
            LoadKind::Mem
        } else {
            LoadKind::Int
        }
    }

    /// Wraps `expr` in a cast when its machine type differs from the target.
    fn cast_to(&self, expr: MirExpr, to: &DataType, scope: ScopeId) -> MirExpr {
        let to_low = self.low(to, scope);
        if expr.lowty == to_low {
            return expr;
        }
        // arrays decay to their implicit address
        if expr.lowty.kind == MirTypeKind::Array && to_low.is_integer() {
            let MirExprKind::Load { base, offset, .. } = expr.kind else {
                unreachable!("array value is not a load")
            };
            return MirExpr {
                kind: MirExprKind::LoadAddress { base, offset },
                ty: to.clone(),
                lowty: to_low,
            };
        }
        MirExpr {
            kind: MirExprKind::Cast {
                from: expr.lowty,
                to: to_low,
                operand: Box::new(expr),
            },
            ty: to.clone(),
            lowty: to_low,
        }
    }

    fn cast_to_low(&self, expr: MirExpr, ty: DataType, to_low: MirType) -> MirExpr {
        if expr.lowty == to_low {
            return expr;
        }
        MirExpr {
            kind: MirExprKind::Cast {
                from: expr.lowty,
                to: to_low,
                operand: Box::new(expr),
            },
            ty,
            lowty: to_low,
        }
    }

    fn lower_subexpr(&mut self, expr: &Subexpr, scope: ScopeId) -> MirExpr {
        match expr {
            Subexpr::Paren(inner) => self.lower_subexpr(inner, scope),
            Subexpr::Leaf(token) => self.lower_leaf(*token, scope),
            Subexpr::Folded(number) => lower_number(*number),
            Subexpr::Unary { op, operand } => self.lower_unary(*op, operand, scope),
            Subexpr::Binary { op, left, right } => self.lower_binary(*op, left, right, scope),
            Subexpr::Cast { to, operand, .. } => {
                let lowered = self.lower_subexpr(operand, scope);
                self.cast_to(lowered, to, scope)
            }
            Subexpr::SizeOf { of, .. } => {
                let size = match of {
                    SizeOfArg::Type(ty) => size_of_type(ty, self.scopes, scope),
                    SizeOfArg::Expr(inner) => {
                        let lowered = self.lower_subexpr(inner, scope);
                        lowered.lowty.size
                    }
                };
                MirExpr {
                    kind: MirExprKind::Immediate(Immediate::Int(size as i64)),
                    ty: DataType::unsigned_long(),
                    lowty: MirType::U64,
                }
            }
            Subexpr::Call(call) => self.lower_call(call.name, &call.args, scope),
            Subexpr::InitList { .. } => unreachable!("initializer list outside a declaration"),
            Subexpr::Error => unreachable!("lowering an error node"),
        }
    }

    fn lower_leaf(&mut self, token: Token, scope: ScopeId) -> MirExpr {
        if token.kind == TokenKind::Identifier {
            let name = self.text(token);
            let ty = self.symbol_type(scope, name);
            let low = self.low(&ty, scope);
            let address = self.address_of_symbol(name, &ty);
            return MirExpr {
                kind: MirExprKind::Load {
                    base: Box::new(address),
                    offset: 0,
                    size: low.size,
                    kind: Self::load_kind(low),
                },
                ty,
                lowty: low,
            };
        }

        let text = self.text(token);
        match token.kind {
            TokenKind::CharLiteral => MirExpr {
                kind: MirExprKind::Immediate(Immediate::Int(
                    char_value(text).expect("scanned char literal"),
                )),
                ty: DataType::char_type(),
                lowty: MirType::I8,
            },
            TokenKind::NumericFloat => MirExpr {
                kind: MirExprKind::Immediate(Immediate::Float(text.to_string())),
                ty: DataType::float(),
                lowty: MirType::F32,
            },
            TokenKind::NumericDouble => MirExpr {
                kind: MirExprKind::Immediate(Immediate::Double(text.to_string())),
                ty: DataType::double(),
                lowty: MirType::F64,
            },
            TokenKind::StringLiteral => MirExpr {
                kind: MirExprKind::Immediate(Immediate::Str(
                    text[1..text.len() - 1].to_string(),
                )),
                ty: DataType::string(),
                lowty: MirType::PTR,
            },
            _ => MirExpr {
                kind: MirExprKind::Immediate(Immediate::Int(
                    integer_value(text).expect("scanned integer literal"),
                )),
                ty: DataType::int(),
                lowty: MirType::I32,
            },
        }
    }

    fn lower_unary(&mut self, op: Token, operand: &Subexpr, scope: ScopeId) -> MirExpr {
        match op.kind {
            TokenKind::Star => {
                let pointer = self.lower_subexpr(operand, scope);
                let pointee = pointer
                    .ty
                    .pointee()
                    .cloned()
                    .unwrap_or_else(|| unreachable!("dereference of non-pointer"));
                let low = self.low(&pointee, scope);
                MirExpr {
                    kind: MirExprKind::Load {
                        base: Box::new(pointer),
                        offset: 0,
                        size: low.size,
                        kind: Self::load_kind(low),
                    },
                    ty: pointee,
                    lowty: low,
                }
            }
            TokenKind::Ampersand => {
                let place = self.lower_subexpr(operand, scope);
                let ty = DataType::Address {
                    to: Box::new(place.ty.clone()),
                };
                let MirExprKind::Load { base, offset, .. } = place.kind else {
                    unreachable!("address-of a non-lvalue")
                };
                MirExpr {
                    kind: MirExprKind::LoadAddress { base, offset },
                    ty,
                    lowty: MirType::PTR,
                }
            }
            TokenKind::Plus => self.lower_subexpr(operand, scope),
            TokenKind::Minus => {
                let inner = self.lower_subexpr(operand, scope);
                let op = if inner.lowty.is_float() {
                    MirUnaryOp::FNegate
                } else {
                    MirUnaryOp::INegate
                };
                let (ty, lowty) = (inner.ty.clone(), inner.lowty);
                MirExpr {
                    kind: MirExprKind::Unary {
                        op,
                        operand: Box::new(inner),
                    },
                    ty,
                    lowty,
                }
            }
            TokenKind::BitwiseNot => {
                let inner = self.lower_subexpr(operand, scope);
                let (ty, lowty) = (inner.ty.clone(), inner.lowty);
                MirExpr {
                    kind: MirExprKind::Unary {
                        op: MirUnaryOp::IBitNot,
                        operand: Box::new(inner),
                    },
                    ty,
                    lowty,
                }
            }
            TokenKind::LogicalNot => {
                let inner = self.lower_subexpr(operand, scope);
                MirExpr {
                    kind: MirExprKind::Unary {
                        op: MirUnaryOp::LogicalNot,
                        operand: Box::new(inner),
                    },
                    ty: DataType::int(),
                    lowty: MirType::I32,
                }
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                // prefix increment is the matching compound assignment
                let one = MirExpr {
                    kind: MirExprKind::Immediate(Immediate::Int(1)),
                    ty: DataType::int(),
                    lowty: MirType::I32,
                };
                let arith = if op.kind == TokenKind::PlusPlus {
                    TokenKind::Plus
                } else {
                    TokenKind::Minus
                };
                let place = self.lower_subexpr(operand, scope);
                self.compound_store(arith, place, one, scope)
            }
            other => unreachable!("unary operator {other:?}"),
        }
    }

    fn lower_binary(
        &mut self,
        op: Token,
        left: &Subexpr,
        right: &Subexpr,
        scope: ScopeId,
    ) -> MirExpr {
        match op.kind {
            TokenKind::Dot => {
                let mut place = self.lower_subexpr(left, scope);
                let composite = place
                    .ty
                    .composite_name()
                    .unwrap_or_else(|| unreachable!("member access on non-struct"))
                    .to_string();
                let Subexpr::Leaf(member_token) = right else {
                    unreachable!("member name is not a leaf")
                };
                let (member_ty, member_offset) =
                    self.member_info(scope, &composite, self.text(*member_token));
                let member_low = self.low(&member_ty, scope);

                let MirExprKind::Load { offset, size, kind, .. } = &mut place.kind else {
                    unreachable!("member access base is not a load")
                };
                *offset += member_offset as i64;
                *size = member_low.size;
                *kind = Self::load_kind(member_low);
                place.ty = member_ty;
                place.lowty = member_low;
                place
            }
            TokenKind::Arrow => {
                let pointer = self.lower_subexpr(left, scope);
                let composite = pointer
                    .ty
                    .pointee()
                    .and_then(|inner| inner.composite_name())
                    .unwrap_or_else(|| unreachable!("arrow on non-struct-pointer"))
                    .to_string();
                let Subexpr::Leaf(member_token) = right else {
                    unreachable!("member name is not a leaf")
                };
                let (member_ty, member_offset) =
                    self.member_info(scope, &composite, self.text(*member_token));
                let member_low = self.low(&member_ty, scope);
                MirExpr {
                    kind: MirExprKind::Load {
                        base: Box::new(pointer),
                        offset: member_offset as i64,
                        size: member_low.size,
                        kind: Self::load_kind(member_low),
                    },
                    ty: member_ty,
                    lowty: member_low,
                }
            }
            TokenKind::SquareOpen => {
                let array = self.lower_subexpr(left, scope);
                let index = self.lower_subexpr(right, scope);
                self.lower_index(array, index, scope)
            }
            kind if kind.is_assignment_op() => {
                let place = self.lower_subexpr(left, scope);
                let value = self.lower_subexpr(right, scope);
                if kind == TokenKind::Assignment {
                    self.plain_store(place, value, scope)
                } else {
                    let arith = compound_op(kind);
                    self.compound_store(arith, place, value, scope)
                }
            }
            _ => {
                let lhs = self.lower_subexpr(left, scope);
                let rhs = self.lower_subexpr(right, scope);
                self.binary_node(op.kind, lhs, rhs, scope)
            }
        }
    }

    /// Arrays carry implicit addresses, pointers are loaded first.
    fn lower_index(&mut self, array: MirExpr, index: MirExpr, scope: ScopeId) -> MirExpr {
        let element = array
            .ty
            .pointee()
            .cloned()
            .unwrap_or_else(|| unreachable!("indexing a non-pointer"));
        let element_low = self.low(&element, scope);

        let (base, carried_offset) = if matches!(array.ty, DataType::Array { .. }) {
            let MirExprKind::Load { base, offset, .. } = array.kind else {
                unreachable!("array value is not a load")
            };
            (base, offset)
        } else {
            (Box::new(array), 0)
        };

        let index_node = MirExpr {
            kind: MirExprKind::Index {
                base,
                index: Box::new(index),
                elem_size: element_low.size,
            },
            ty: DataType::Address {
                to: Box::new(element.clone()),
            },
            lowty: MirType::PTR,
        };

        MirExpr {
            kind: MirExprKind::Load {
                base: Box::new(index_node),
                offset: carried_offset,
                size: element_low.size,
                kind: Self::load_kind(element_low),
            },
            ty: element,
            lowty: element_low,
        }
    }

    /// `lhs = rhs`: the lvalue's outer load is stripped back to its address.
    fn plain_store(&mut self, place: MirExpr, value: MirExpr, scope: ScopeId) -> MirExpr {
        let target_ty = place.ty.clone();
        let low = self.low(&target_ty, scope);
        let value = self.cast_to(value, &target_ty, scope);

        let MirExprKind::Load { base, offset, .. } = place.kind else {
            unreachable!("assignment to a non-lvalue")
        };
        MirExpr {
            kind: MirExprKind::Store {
                target: base,
                value: Box::new(value),
                offset,
                size: low.size,
            },
            ty: target_ty,
            lowty: low,
        }
    }

    /// `lhs op= rhs` re-reads the lvalue as the left operand of the
    /// operation and stores the result back.
    fn compound_store(
        &mut self,
        arith: TokenKind,
        place: MirExpr,
        value: MirExpr,
        scope: ScopeId,
    ) -> MirExpr {
        let target_ty = place.ty.clone();
        let low = self.low(&target_ty, scope);

        let current = place.clone();
        let combined = self.binary_node(arith, current, value, scope);
        let combined = self.cast_to(combined, &target_ty, scope);

        let MirExprKind::Load { base, offset, .. } = place.kind else {
            unreachable!("assignment to a non-lvalue")
        };
        MirExpr {
            kind: MirExprKind::Store {
                target: base,
                value: Box::new(combined),
                offset,
                size: low.size,
            },
            ty: target_ty,
            lowty: low,
        }
    }

    /// General binary operation with C's conversions applied: pointer
    /// arithmetic becomes indexing, mixed operands get casts, comparisons
    /// yield int.
    fn binary_node(
        &mut self,
        op: TokenKind,
        left: MirExpr,
        right: MirExpr,
        scope: ScopeId,
    ) -> MirExpr {
        let left_ptr = left.ty.indirection_level() > 0;
        let right_ptr = right.ty.indirection_level() > 0;

        // pointer +- integer scales by the element size
        if left_ptr && !right_ptr && matches!(op, TokenKind::Plus | TokenKind::Minus) {
            let index = if op == TokenKind::Minus {
                let (ty, lowty) = (right.ty.clone(), right.lowty);
                MirExpr {
                    kind: MirExprKind::Unary {
                        op: MirUnaryOp::INegate,
                        operand: Box::new(right),
                    },
                    ty,
                    lowty,
                }
            } else {
                right
            };
            return self.pointer_offset(left, index, scope);
        }
        if right_ptr && !left_ptr && op == TokenKind::Plus {
            return self.pointer_offset(right, left, scope);
        }

        // pointer difference: byte distance divided by the element size
        if left_ptr && right_ptr && op == TokenKind::Minus {
            let elem_size = left
                .ty
                .pointee()
                .map(|inner| size_of_type(inner, self.scopes, scope))
                .unwrap_or(1);
            let difference = MirExpr {
                kind: MirExprKind::Binary {
                    op: MirBinaryOp::ISub,
                    left: Box::new(left),
                    right: Box::new(right),
                    size: 8,
                },
                ty: DataType::long_long(),
                lowty: MirType::I64,
            };
            if elem_size <= 1 {
                return difference;
            }
            let size = MirExpr {
                kind: MirExprKind::Immediate(Immediate::Int(elem_size as i64)),
                ty: DataType::long_long(),
                lowty: MirType::I64,
            };
            return MirExpr {
                kind: MirExprKind::Binary {
                    op: MirBinaryOp::IDiv,
                    left: Box::new(difference),
                    right: Box::new(size),
                    size: 8,
                },
                ty: DataType::long_long(),
                lowty: MirType::I64,
            };
        }

        if matches!(op, TokenKind::LogicalAnd | TokenKind::LogicalOr) {
            let left = self.cast_to_low(left, DataType::int(), MirType::BOOL);
            let right = self.cast_to_low(right, DataType::int(), MirType::BOOL);
            let mir_op = if op == TokenKind::LogicalAnd {
                MirBinaryOp::LogicalAnd
            } else {
                MirBinaryOp::LogicalOr
            };
            return MirExpr {
                kind: MirExprKind::Binary {
                    op: mir_op,
                    left: Box::new(left),
                    right: Box::new(right),
                    size: 4,
                },
                ty: DataType::int(),
                lowty: MirType::I32,
            };
        }

        if op.is_comparison_op() {
            let common = if left_ptr || right_ptr {
                left.ty.clone()
            } else {
                resultant_type(&left.ty, &right.ty, op)
            };
            let common_low = self.low(&common, scope);
            let left = self.cast_to_low(left, common.clone(), common_low);
            let right = self.cast_to_low(right, common, common_low);
            let mir_op = comparison_op(op, common_low.is_float());
            return MirExpr {
                kind: MirExprKind::Binary {
                    op: mir_op,
                    left: Box::new(left),
                    right: Box::new(right),
                    size: common_low.size,
                },
                ty: DataType::int(),
                lowty: MirType::I32,
            };
        }

        let result = resultant_type(&left.ty, &right.ty, op);
        let low = self.low(&result, scope);
        let left = self.cast_to_low(left, result.clone(), low);
        let right = self.cast_to_low(right, result.clone(), low);
        let mir_op = arithmetic_op(op, low);
        MirExpr {
            kind: MirExprKind::Binary {
                op: mir_op,
                left: Box::new(left),
                right: Box::new(right),
                size: low.size,
            },
            ty: result,
            lowty: low,
        }
    }

    /// `p + i` / `a + i` as an Index address plus a load-free value.
    fn pointer_offset(&mut self, pointer: MirExpr, index: MirExpr, scope: ScopeId) -> MirExpr {
        let ty = pointer.ty.clone();
        let elem_size = ty
            .pointee()
            .map(|inner| size_of_type(inner, self.scopes, scope))
            .unwrap_or(1);

        let base = if matches!(pointer.ty, DataType::Array { .. }) {
            // the array's address is implicit; take it instead of its value
            let MirExprKind::Load { base, offset, .. } = pointer.kind else {
                unreachable!("array value is not a load")
            };
            Box::new(MirExpr {
                kind: MirExprKind::LoadAddress { base, offset },
                ty: ty.clone(),
                lowty: MirType::PTR,
            })
        } else {
            Box::new(pointer)
        };

        MirExpr {
            kind: MirExprKind::Index {
                base,
                index: Box::new(index),
                elem_size,
            },
            ty,
            lowty: MirType::PTR,
        }
    }

    fn lower_call(&mut self, name_token: Token, args: &[Subexpr], scope: ScopeId) -> MirExpr {
        let name = self.text(name_token).to_string();
        let (return_type, param_types): (DataType, Vec<DataType>) = {
            let function = self
                .functions
                .get(&name)
                .unwrap_or_else(|| unreachable!("call to unknown function {name}"));
            (
                function.return_type.clone(),
                function.params.iter().map(|p| p.ty.clone()).collect(),
            )
        };

        let mut lowered = Vec::with_capacity(args.len());
        for (position, arg) in args.iter().enumerate() {
            let value = self.lower_subexpr(arg, scope);
            let value = match param_types.get(position) {
                Some(param_ty) => self.cast_to(value, param_ty, scope),
                // variadic extras are passed as they are
                None => value,
            };
            if value.lowty.kind == MirTypeKind::Struct {
                self.error_at(
                    name_token,
                    format_args!("struct arguments are not supported"),
                );
            }
            lowered.push(value);
        }

        let low = self.low(&return_type, scope);
        MirExpr {
            kind: MirExprKind::Call {
                name,
                args: lowered,
            },
            ty: return_type,
            lowty: low,
        }
    }
}

fn lower_number(number: Number) -> MirExpr {
    match number {
        Number::Int(value) => MirExpr {
            kind: MirExprKind::Immediate(Immediate::Int(value)),
            ty: DataType::int(),
            lowty: MirType::I32,
        },
        Number::Float(value) => MirExpr {
            kind: MirExprKind::Immediate(Immediate::Float(format!("{value}"))),
            ty: DataType::float(),
            lowty: MirType::F32,
        },
        Number::Double(value) => MirExpr {
            kind: MirExprKind::Immediate(Immediate::Double(format!("{value}"))),
            ty: DataType::double(),
            lowty: MirType::F64,
        },
    }
}

fn compound_op(kind: TokenKind) -> TokenKind {
    match kind {
        TokenKind::PlusAssign => TokenKind::Plus,
        TokenKind::MinusAssign => TokenKind::Minus,
        TokenKind::MulAssign => TokenKind::Star,
        TokenKind::DivAssign => TokenKind::Slash,
        TokenKind::ModuloAssign => TokenKind::Modulo,
        TokenKind::LshiftAssign => TokenKind::ShiftLeft,
        TokenKind::RshiftAssign => TokenKind::ShiftRight,
        TokenKind::AndAssign => TokenKind::Ampersand,
        TokenKind::OrAssign => TokenKind::BitwiseOr,
        TokenKind::XorAssign => TokenKind::BitwiseXor,
        other => unreachable!("compound assignment {other:?}"),
    }
}

fn comparison_op(kind: TokenKind, float: bool) -> MirBinaryOp {
    if float {
        match kind {
            TokenKind::LessThan => MirBinaryOp::FCmpLt,
            TokenKind::GreaterThan => MirBinaryOp::FCmpGt,
            TokenKind::LessEquals => MirBinaryOp::FCmpLe,
            TokenKind::GreaterEquals => MirBinaryOp::FCmpGe,
            TokenKind::EqualityCheck => MirBinaryOp::FCmpEq,
            TokenKind::NotEquals => MirBinaryOp::FCmpNe,
            other => unreachable!("comparison {other:?}"),
        }
    } else {
        match kind {
            TokenKind::LessThan => MirBinaryOp::ICmpLt,
            TokenKind::GreaterThan => MirBinaryOp::ICmpGt,
            TokenKind::LessEquals => MirBinaryOp::ICmpLe,
            TokenKind::GreaterEquals => MirBinaryOp::ICmpGe,
            TokenKind::EqualityCheck => MirBinaryOp::ICmpEq,
            TokenKind::NotEquals => MirBinaryOp::ICmpNe,
            other => unreachable!("comparison {other:?}"),
        }
    }
}

fn arithmetic_op(kind: TokenKind, low: MirType) -> MirBinaryOp {
    if low.is_float() {
        return match kind {
            TokenKind::Plus => MirBinaryOp::FAdd,
            TokenKind::Minus => MirBinaryOp::FSub,
            TokenKind::Star => MirBinaryOp::FMul,
            TokenKind::Slash => MirBinaryOp::FDiv,
            other => unreachable!("float operator {other:?}"),
        };
    }
    let unsigned = low.is_unsigned();
    match kind {
        TokenKind::Plus => {
            if unsigned {
                MirBinaryOp::UAdd
            } else {
                MirBinaryOp::IAdd
            }
        }
        TokenKind::Minus => {
            if unsigned {
                MirBinaryOp::USub
            } else {
                MirBinaryOp::ISub
            }
        }
        TokenKind::Star => {
            if unsigned {
                MirBinaryOp::UMul
            } else {
                MirBinaryOp::IMul
            }
        }
        TokenKind::Slash => {
            if unsigned {
                MirBinaryOp::UDiv
            } else {
                MirBinaryOp::IDiv
            }
        }
        TokenKind::Modulo => {
            if unsigned {
                MirBinaryOp::UMod
            } else {
                MirBinaryOp::IMod
            }
        }
        TokenKind::Ampersand => MirBinaryOp::IBitAnd,
        TokenKind::BitwiseOr => MirBinaryOp::IBitOr,
        TokenKind::BitwiseXor => MirBinaryOp::IBitXor,
        TokenKind::ShiftLeft => MirBinaryOp::IShiftLeft,
        TokenKind::ShiftRight => MirBinaryOp::IShiftRight,
        other => unreachable!("binary operator {other:?}"),
    }
}

/// Inserts primitives just before a scope's trailing stack release so that
/// jumps to them still run the release.
fn insert_before_stack_free(scope: &mut MirScope, primitives: Vec<MirPrimitive>) {
    let at = if matches!(scope.statements.last(), Some(MirPrimitive::StackFree(_))) {
        scope.statements.len() - 1
    } else {
        scope.statements.len()
    };
    for (index, primitive) in primitives.into_iter().enumerate() {
        scope.statements.insert(at + index, primitive);
    }
}

fn statement_token(node: &Node) -> Option<Token> {
    match node {
        Node::Subexpr(subexpr) => subexpr.token(),
        Node::Return(r) => Some(r.token),
        Node::Break(t) | Node::Continue(t) => Some(*t),
        _ => None,
    }
}

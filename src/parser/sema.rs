//! Second-pass context checking over each global statement and function
//! body: name/type resolution for every subexpression, implicit-conversion
//! validation, lvalue checks and call signatures.

use std::fmt;

use crate::ast::datatype::{integer_conversion_rank, resultant_type, DataType, Qualifiers};
use crate::ast::scope::ScopeId;
use crate::ast::{
    Ast, Block, Declaration, Function, IfNode, Node, Number, SizeOfArg, Subexpr,
};
use crate::diag;
use crate::lexer::token::{Token, TokenKind};
use crate::SourceFile;

/// How an implicit conversion may be performed.
#[derive(Debug, PartialEq, Eq)]
pub enum Conversion {
    Ok,
    Lossy(&'static str),
    Invalid,
}

pub struct ContextChecker<'a> {
    source: &'a SourceFile,
    pub errors: usize,
    pub warnings: usize,
}

impl<'a> ContextChecker<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        ContextChecker {
            source,
            errors: 0,
            warnings: 0,
        }
    }

    fn error_at(&mut self, token: Token, message: fmt::Arguments) {
        self.errors += 1;
        diag::error(&self.source.name, token.line, token.col, message);
    }

    fn warn_at(&mut self, token: Token, message: fmt::Arguments) {
        self.warnings += 1;
        diag::warning(&self.source.name, token.line, token.col, message);
    }

    fn text(&self, token: Token) -> &'a str {
        token.splice.of(&self.source.text)
    }

    pub fn check_program(&mut self, ast: &Ast) {
        for statement in &ast.global.statements {
            self.check_node(statement, ast.global.scope, ast, None);
        }
        for (_, function) in &ast.functions {
            if let Some(body) = &function.body {
                self.check_block(body, ast, Some(function));
            }
        }
    }

    fn check_block(&mut self, block: &Block, ast: &Ast, function: Option<&Function>) {
        for statement in &block.statements {
            self.check_node(statement, block.scope, ast, function);
        }
    }

    fn check_node(
        &mut self,
        node: &Node,
        scope: ScopeId,
        ast: &Ast,
        function: Option<&Function>,
    ) {
        match node {
            Node::Subexpr(subexpr) => {
                self.check_subexpr(subexpr, scope, ast);
            }
            Node::Declaration(declaration) => {
                self.check_declaration(declaration, scope, ast);
            }
            Node::Block(block) => self.check_block(block, ast, function),
            Node::If(if_node) => self.check_if(if_node, ast, function),
            Node::While(while_node) => {
                self.check_condition(&while_node.condition, while_node.body.scope, ast);
                self.check_block(&while_node.body, ast, function);
            }
            Node::For(for_node) => {
                let scope = for_node.body.scope;
                self.check_subexpr(&for_node.init, scope, ast);
                self.check_condition(&for_node.condition, scope, ast);
                self.check_subexpr(&for_node.update, scope, ast);
                self.check_block(&for_node.body, ast, function);
            }
            Node::Return(return_node) => {
                let Some(function) = function else {
                    self.error_at(
                        return_node.token,
                        format_args!("return outside of a function"),
                    );
                    return;
                };
                match (&return_node.value, &function.return_type) {
                    (None, DataType::Void) => {}
                    (None, _) => self.error_at(
                        return_node.token,
                        format_args!("non-void function must return a value"),
                    ),
                    (Some(value), expected) => {
                        let actual = self.check_subexpr(value, scope, ast);
                        if *expected == DataType::Void {
                            self.error_at(
                                return_node.token,
                                format_args!("void function must not return a value"),
                            );
                        } else {
                            self.require_convertible(
                                return_node.token,
                                &actual,
                                expected,
                                "return value",
                            );
                        }
                    }
                }
            }
            Node::Break(token) | Node::Continue(token) => {
                if !ast.scopes.in_loop(scope) {
                    self.error_at(
                        *token,
                        format_args!("\"{}\" outside of a loop", self.text(*token)),
                    );
                }
            }
            Node::Error => {}
        }
    }

    fn check_if(&mut self, if_node: &IfNode, ast: &Ast, function: Option<&Function>) {
        if let Some(condition) = &if_node.condition {
            self.check_condition(condition, if_node.body.scope, ast);
        }
        self.check_block(&if_node.body, ast, function);
        if let Some(next) = &if_node.next {
            self.check_if(next, ast, function);
        }
    }

    fn check_condition(&mut self, condition: &Subexpr, scope: ScopeId, ast: &Ast) {
        let ty = self.check_subexpr(condition, scope, ast);
        if ty.is_composite() {
            if let Some(token) = condition.token() {
                self.error_at(token, format_args!("condition has type \"{ty}\""));
            }
        }
    }

    fn check_declaration(&mut self, declaration: &Declaration, scope: ScopeId, ast: &Ast) {
        for decl in &declaration.decls {
            // pointers may reference incomplete composites; direct values
            // and arrays of them need a layout
            let mut layout_ty = &decl.ty;
            while let DataType::Array { of, .. } = layout_ty {
                layout_ty = of;
            }
            if let Some(name) = layout_ty.composite_name() {
                if ast.scopes.find_composite(scope, name).is_none() {
                    self.error_at(
                        decl.name,
                        format_args!("variable has incomplete type \"{layout_ty}\""),
                    );
                    continue;
                }
            }
            if decl.ty == DataType::Void {
                self.error_at(
                    decl.name,
                    format_args!("variable \"{}\" declared void", self.text(decl.name)),
                );
                continue;
            }
            let Some(init) = &decl.init else { continue };
            match init {
                Subexpr::InitList { brace, values } => {
                    self.check_init_list(*brace, values, &decl.ty, scope, ast);
                }
                _ => {
                    let actual = self.check_subexpr(init, scope, ast);
                    self.require_convertible(decl.name, &actual, &decl.ty, "initializer");
                }
            }
        }
    }

    /// Initializer lists must structurally match the declared aggregate.
    fn check_init_list(
        &mut self,
        brace: Token,
        values: &[Subexpr],
        target: &DataType,
        scope: ScopeId,
        ast: &Ast,
    ) {
        match target {
            DataType::Array { of, count } => {
                if values.len() as u64 > *count {
                    self.error_at(
                        brace,
                        format_args!(
                            "{} initializers for an array of {count}",
                            values.len()
                        ),
                    );
                }
                for value in values {
                    match value {
                        Subexpr::InitList {
                            brace: inner_brace,
                            values: inner,
                        } => self.check_init_list(*inner_brace, inner, of, scope, ast),
                        _ => {
                            let actual = self.check_subexpr(value, scope, ast);
                            self.require_convertible(brace, &actual, of, "array initializer");
                        }
                    }
                }
            }
            DataType::Struct { name } | DataType::Union { name } => {
                let Some(composite) = ast.scopes.find_composite(scope, name) else {
                    self.error_at(
                        brace,
                        format_args!("initializer for incomplete type \"{target}\""),
                    );
                    return;
                };
                if values.len() > composite.members.len() {
                    self.error_at(
                        brace,
                        format_args!(
                            "{} initializers for \"{target}\" with {} members",
                            values.len(),
                            composite.members.len()
                        ),
                    );
                }
                let member_types: Vec<DataType> = composite
                    .members
                    .values()
                    .map(|member| member.ty.clone())
                    .collect();
                for (value, member_ty) in values.iter().zip(member_types.iter()) {
                    match value {
                        Subexpr::InitList {
                            brace: inner_brace,
                            values: inner,
                        } => self.check_init_list(*inner_brace, inner, member_ty, scope, ast),
                        _ => {
                            let actual = self.check_subexpr(value, scope, ast);
                            self.require_convertible(brace, &actual, member_ty, "member initializer");
                        }
                    }
                }
            }
            _ => {
                // a scalar accepts a single-element list
                if values.len() != 1 {
                    self.error_at(
                        brace,
                        format_args!("scalar initializer list must have one element"),
                    );
                    return;
                }
                let actual = self.check_subexpr(&values[0], scope, ast);
                self.require_convertible(brace, &actual, target, "initializer");
            }
        }
    }

    // ---- expressions ------------------------------------------------------

    pub fn check_subexpr(&mut self, expr: &Subexpr, scope: ScopeId, ast: &Ast) -> DataType {
        match expr {
            Subexpr::Paren(inner) => self.check_subexpr(inner, scope, ast),
            Subexpr::Leaf(token) => self.leaf_type(*token, scope, ast),
            Subexpr::Folded(number) => match number {
                Number::Int(_) => DataType::int(),
                Number::Float(_) => DataType::float(),
                Number::Double(_) => DataType::double(),
            },
            Subexpr::Binary { op, left, right } => self.check_binary(*op, left, right, scope, ast),
            Subexpr::Unary { op, operand } => self.check_unary(*op, operand, scope, ast),
            Subexpr::Call(call) => self.check_call(call.name, &call.args, scope, ast),
            Subexpr::Cast { paren, to, operand } => {
                let from = self.check_subexpr(operand, scope, ast);
                self.check_cast(*paren, &from, to)
            }
            Subexpr::SizeOf { token, of } => {
                match of {
                    SizeOfArg::Type(ty) => self.check_sizeof_type(*token, ty, scope, ast),
                    SizeOfArg::Expr(inner) => {
                        let ty = self.check_subexpr(inner, scope, ast);
                        self.check_sizeof_type(*token, &ty, scope, ast);
                    }
                }
                DataType::unsigned_long()
            }
            Subexpr::InitList { brace, .. } => {
                self.error_at(
                    *brace,
                    format_args!("initializer list outside of a declaration"),
                );
                DataType::Error
            }
            Subexpr::Error => DataType::Error,
        }
    }

    fn leaf_type(&mut self, token: Token, scope: ScopeId, ast: &Ast) -> DataType {
        match token.kind {
            TokenKind::Identifier => ast
                .scopes
                .find_symbol(scope, self.text(token))
                .map(|(_, ty)| ty.clone())
                // undeclared use was reported while parsing
                .unwrap_or(DataType::Error),
            TokenKind::CharLiteral => DataType::char_type(),
            TokenKind::NumericFloat => DataType::float(),
            TokenKind::NumericDouble => DataType::double(),
            TokenKind::NumericDec
            | TokenKind::NumericBin
            | TokenKind::NumericHex
            | TokenKind::NumericOct => DataType::int(),
            TokenKind::StringLiteral => DataType::string(),
            _ => DataType::Error,
        }
    }

    fn check_binary(
        &mut self,
        op: Token,
        left: &Subexpr,
        right: &Subexpr,
        scope: ScopeId,
        ast: &Ast,
    ) -> DataType {
        if op.kind.is_member_access_op() {
            return self.check_member_access(op, left, right, scope, ast);
        }
        if op.kind == TokenKind::SquareOpen {
            return self.check_index(op, left, right, scope, ast);
        }

        let left_ty = self.check_subexpr(left, scope, ast);
        let right_ty = self.check_subexpr(right, scope, ast);
        if left_ty == DataType::Error || right_ty == DataType::Error {
            return DataType::Error;
        }

        if op.kind.is_assignment_op() {
            if !is_valid_lvalue(left, &left_ty) {
                self.error_at(op, format_args!("left operand is not an assignable lvalue"));
                return DataType::Error;
            }
            if matches!(left_ty, DataType::Array { .. }) {
                self.error_at(op, format_args!("array type is not assignable"));
                return DataType::Error;
            }
            if left_ty.is_composite() || right_ty.is_composite() {
                // only plain assignment between identically named structs
                if op.kind != TokenKind::Assignment || left_ty != right_ty {
                    self.error_at(
                        op,
                        format_args!(
                            "incompatible types in assignment (\"{left_ty}\" and \"{right_ty}\")"
                        ),
                    );
                    return DataType::Error;
                }
                return left_ty;
            }
            let result = resultant_type(&left_ty, &right_ty, op.kind);
            if left_ty.indirection_level() > 0 && right_ty.indirection_level() > 0 {
                let pointees_match = match (left_ty.pointee(), right_ty.pointee()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                if !pointees_match {
                    self.warn_at(
                        op,
                        format_args!(
                            "pointer type mismatch in assignment (\"{left_ty}\" from \"{right_ty}\")"
                        ),
                    );
                }
                if let (Some(left_inner), Some(right_inner)) =
                    (left_ty.pointee(), right_ty.pointee())
                {
                    if right_inner.flags().contains(Qualifiers::CONST)
                        && !left_inner.flags().contains(Qualifiers::CONST)
                    {
                        self.warn_at(op, format_args!("assignment drops const qualifier"));
                    }
                }
            } else if op.kind == TokenKind::Assignment {
                self.require_convertible(op, &right_ty, &left_ty, "assignment");
            }
            return result;
        }

        // pointer operands restrict the operator set
        let ptr_rules_ok = match (
            left_ty.indirection_level() > 0,
            right_ty.indirection_level() > 0,
        ) {
            (false, false) => true,
            // null comparisons are the one mixed comparison admitted
            (true, false) => {
                right_ty.is_integer()
                    && (matches!(op.kind, TokenKind::Plus | TokenKind::Minus)
                        || op.kind.is_comparison_op())
            }
            (false, true) => {
                left_ty.is_integer()
                    && (op.kind == TokenKind::Plus || op.kind.is_comparison_op())
            }
            (true, true) => {
                (op.kind == TokenKind::Minus || op.kind.is_comparison_op())
                    && left_ty == right_ty
            }
        };
        if !ptr_rules_ok {
            self.error_at(
                op,
                format_args!(
                    "invalid pointer arithmetic (\"{left_ty}\" {} \"{right_ty}\")",
                    self.text(op)
                ),
            );
            return DataType::Error;
        }

        if left_ty.is_composite() || right_ty.is_composite() {
            self.error_at(
                op,
                format_args!("invalid operands (\"{left_ty}\" and \"{right_ty}\")"),
            );
            return DataType::Error;
        }

        if op.kind.is_comparison_op()
            || op.kind == TokenKind::LogicalAnd
            || op.kind == TokenKind::LogicalOr
        {
            return DataType::int();
        }

        // integer-only operators
        if matches!(
            op.kind,
            TokenKind::Modulo
                | TokenKind::Ampersand
                | TokenKind::BitwiseOr
                | TokenKind::BitwiseXor
                | TokenKind::ShiftLeft
                | TokenKind::ShiftRight
        ) && (left_ty.is_floating() || right_ty.is_floating())
        {
            self.error_at(
                op,
                format_args!("operator \"{}\" requires integer operands", self.text(op)),
            );
            return DataType::Error;
        }

        resultant_type(&left_ty, &right_ty, op.kind)
    }

    fn check_member_access(
        &mut self,
        op: Token,
        left: &Subexpr,
        right: &Subexpr,
        scope: ScopeId,
        ast: &Ast,
    ) -> DataType {
        let left_ty = self.check_subexpr(left, scope, ast);
        if left_ty == DataType::Error {
            return DataType::Error;
        }

        let composite_ty = if op.kind == TokenKind::Dot {
            // the base must denote storage; member loads strip its address
            if !is_valid_lvalue(left, &left_ty) {
                self.error_at(
                    op,
                    format_args!("member access requires an addressable operand"),
                );
                return DataType::Error;
            }
            left_ty.clone()
        } else {
            match &left_ty {
                DataType::Pointer { to, .. } if to.is_composite() => (**to).clone(),
                _ => {
                    self.error_at(
                        op,
                        format_args!("\"->\" requires a pointer to a struct, got \"{left_ty}\""),
                    );
                    return DataType::Error;
                }
            }
        };

        let Some(name) = composite_ty.composite_name() else {
            self.error_at(
                op,
                format_args!("member access on non-struct type \"{left_ty}\""),
            );
            return DataType::Error;
        };

        let Subexpr::Leaf(member_token) = right else {
            self.error_at(op, format_args!("expected a member name"));
            return DataType::Error;
        };
        let member_name = self.text(*member_token);

        let Some(composite) = ast.scopes.find_composite(scope, name) else {
            self.error_at(
                op,
                format_args!("member access into incomplete type \"{composite_ty}\""),
            );
            return DataType::Error;
        };
        match composite.members.get(member_name) {
            Some(member) => member.ty.clone(),
            None => {
                let composite_display = format!("{composite_ty}");
                self.error_at(
                    *member_token,
                    format_args!("no member \"{member_name}\" in \"{composite_display}\""),
                );
                DataType::Error
            }
        }
    }

    fn check_index(
        &mut self,
        op: Token,
        left: &Subexpr,
        right: &Subexpr,
        scope: ScopeId,
        ast: &Ast,
    ) -> DataType {
        let left_ty = self.check_subexpr(left, scope, ast);
        let right_ty = self.check_subexpr(right, scope, ast);
        if left_ty == DataType::Error || right_ty == DataType::Error {
            return DataType::Error;
        }
        if left_ty.indirection_level() == 0 {
            self.error_at(
                op,
                format_args!("indexed value has non-pointer type \"{left_ty}\""),
            );
            return DataType::Error;
        }
        if !right_ty.is_integer() {
            self.error_at(
                op,
                format_args!("array subscript is not an integer (\"{right_ty}\")"),
            );
        }
        left_ty
            .pointee()
            .cloned()
            .unwrap_or(DataType::Error)
    }

    fn check_unary(
        &mut self,
        op: Token,
        operand: &Subexpr,
        scope: ScopeId,
        ast: &Ast,
    ) -> DataType {
        let ty = self.check_subexpr(operand, scope, ast);
        if ty == DataType::Error {
            return DataType::Error;
        }
        match op.kind {
            TokenKind::Star => match ty.pointee() {
                Some(inner) => inner.clone(),
                None => {
                    self.error_at(
                        op,
                        format_args!("dereference of non-pointer type \"{ty}\""),
                    );
                    DataType::Error
                }
            },
            TokenKind::Ampersand => {
                if !is_valid_lvalue(operand, &ty) {
                    self.error_at(op, format_args!("cannot take the address of this operand"));
                    return DataType::Error;
                }
                DataType::Address { to: Box::new(ty) }
            }
            TokenKind::Plus | TokenKind::Minus => {
                if ty.is_composite() {
                    self.error_at(op, format_args!("invalid operand \"{ty}\""));
                    return DataType::Error;
                }
                ty
            }
            TokenKind::BitwiseNot => {
                if !ty.is_integer() {
                    self.error_at(
                        op,
                        format_args!("operator \"~\" requires an integer operand"),
                    );
                    return DataType::Error;
                }
                ty
            }
            TokenKind::LogicalNot => DataType::int(),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                if !is_valid_lvalue(operand, &ty)
                    || matches!(ty, DataType::Array { .. })
                    || ty.is_composite()
                {
                    self.error_at(op, format_args!("operand is not an assignable lvalue"));
                    return DataType::Error;
                }
                ty
            }
            _ => DataType::Error,
        }
    }

    fn check_call(
        &mut self,
        name_token: Token,
        args: &[Subexpr],
        scope: ScopeId,
        ast: &Ast,
    ) -> DataType {
        let name = self.text(name_token);
        let Some(function) = ast.functions.get(name) else {
            // unresolved calls were reported while parsing
            return DataType::Error;
        };

        let arity_ok = if function.is_variadic {
            args.len() >= function.params.len()
        } else {
            args.len() == function.params.len()
        };
        if !arity_ok {
            let expected = function.params.len();
            let found = args.len();
            self.error_at(
                name_token,
                format_args!(
                    "in call to \"{name}\": expected {expected} arguments, found {found}"
                ),
            );
        }

        let param_types: Vec<DataType> =
            function.params.iter().map(|p| p.ty.clone()).collect();
        let return_type = function.return_type.clone();
        if return_type.is_composite() {
            self.error_at(
                name_token,
                format_args!("call to \"{name}\": struct returns are not supported"),
            );
        }
        for (arg, param_ty) in args.iter().zip(param_types.iter()) {
            let arg_ty = self.check_subexpr(arg, scope, ast);
            if arg_ty == DataType::Error {
                continue;
            }
            let position = arg.token().unwrap_or(name_token);
            self.require_convertible(position, &arg_ty, param_ty, "argument");
        }
        // extra variadic arguments are only type-checked for well-formedness
        for arg in args.iter().skip(param_types.len()) {
            self.check_subexpr(arg, scope, ast);
        }

        return_type
    }

    fn check_cast(&mut self, at: Token, from: &DataType, to: &DataType) -> DataType {
        if *from == DataType::Error {
            return to.clone();
        }
        if *to == DataType::Void {
            return DataType::Void;
        }
        let from_ptr = from.indirection_level() > 0;
        let to_ptr = to.indirection_level() > 0;

        if from.is_composite() || to.is_composite() {
            self.error_at(
                at,
                format_args!("invalid cast from \"{from}\" to \"{to}\""),
            );
            return DataType::Error;
        }
        if *from == DataType::Void {
            self.error_at(at, format_args!("cannot cast from void"));
            return DataType::Error;
        }
        if (from_ptr && to.is_floating()) || (from.is_floating() && to_ptr) {
            self.error_at(
                at,
                format_args!("invalid cast between pointer and floating type"),
            );
            return DataType::Error;
        }
        if from_ptr && !to_ptr && integer_conversion_rank(to) < 3 {
            self.warn_at(at, format_args!("cast from pointer to narrower integer"));
        }
        if !from_ptr && to_ptr {
            self.warn_at(at, format_args!("cast from integer to pointer"));
        }
        to.clone()
    }

    fn check_sizeof_type(&mut self, at: Token, ty: &DataType, scope: ScopeId, ast: &Ast) {
        if *ty == DataType::Void {
            self.error_at(at, format_args!("sizeof(void) is invalid"));
            return;
        }
        if let Some(name) = ty.base_type().composite_name() {
            if ast.scopes.find_composite(scope, name).is_none() {
                self.error_at(
                    at,
                    format_args!("sizeof applied to incomplete type"),
                );
            }
        }
    }

    fn require_convertible(
        &mut self,
        at: Token,
        from: &DataType,
        to: &DataType,
        what: &str,
    ) {
        match convertible(from, to) {
            Conversion::Ok => {}
            Conversion::Lossy(why) => {
                self.warn_at(at, format_args!("{what}: {why}"));
            }
            Conversion::Invalid => {
                self.error_at(
                    at,
                    format_args!("incompatible types in {what} (\"{from}\" to \"{to}\")"),
                );
            }
        }
    }
}

/// The left side of an assignment must denote a memory location: a
/// dereference, an index, a member access, or a non-const identifier.
pub fn is_valid_lvalue(expr: &Subexpr, ty: &DataType) -> bool {
    match expr {
        Subexpr::Paren(inner) => is_valid_lvalue(inner, ty),
        Subexpr::Unary { op, .. } => op.kind == TokenKind::Star,
        Subexpr::Binary { op, .. } => {
            matches!(op.kind, TokenKind::SquareOpen | TokenKind::Dot | TokenKind::Arrow)
        }
        Subexpr::Leaf(token) => {
            token.kind == TokenKind::Identifier && !ty.flags().contains(Qualifiers::CONST)
        }
        _ => false,
    }
}

/// Implicit-conversion table shared by assignments, initializers, arguments
/// and returns.
pub fn convertible(from: &DataType, to: &DataType) -> Conversion {
    if from == to {
        return Conversion::Ok;
    }
    if *from == DataType::Error || *to == DataType::Error {
        return Conversion::Ok;
    }

    let from_ptr = from.indirection_level() > 0;
    let to_ptr = to.indirection_level() > 0;

    match (from_ptr, to_ptr) {
        (false, false) => {
            if from.is_composite() || to.is_composite() {
                return Conversion::Invalid;
            }
            if *from == DataType::Void || *to == DataType::Void {
                return Conversion::Invalid;
            }
            if from.is_primary(TokenKind::Double) && !to.is_primary(TokenKind::Double) {
                return Conversion::Lossy("implicit cast loses precision");
            }
            if from.is_floating() && to.is_integer() {
                return Conversion::Lossy("implicit float to integer conversion");
            }
            if from.is_integer()
                && to.is_integer()
                && integer_conversion_rank(from) > integer_conversion_rank(to)
            {
                return Conversion::Lossy("implicit cast to a narrower integer");
            }
            Conversion::Ok
        }
        (true, true) => {
            match (from.pointee(), to.pointee()) {
                (Some(a), Some(b)) if a == b => Conversion::Ok,
                _ => Conversion::Lossy("pointer type mismatch"),
            }
        }
        (true, false) => {
            if to.is_integer() {
                Conversion::Lossy("implicit pointer to integer conversion")
            } else {
                Conversion::Invalid
            }
        }
        (false, true) => {
            if from.is_integer() {
                Conversion::Lossy("implicit integer to pointer conversion")
            } else {
                Conversion::Invalid
            }
        }
    }
}

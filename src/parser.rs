//! Recursive-descent parser. Statements and declarations live here; the
//! precedence-climbing subexpression parser is in `expr`, the second-pass
//! context checks in `sema`.

pub mod expr;
pub mod sema;

use std::fmt;
use std::mem;

use indexmap::IndexMap;

use crate::ast::composite::{Composite, CompositeKind, Member};
use crate::ast::datatype::{DataType, Qualifiers};
use crate::ast::scope::{Scope, ScopeId, ScopeKind, Scopes};
use crate::ast::{
    Ast, Block, DeclInfo, Declaration, ForNode, Function, IfNode, Node, Param, ReturnNode,
    Subexpr, WhileNode,
};
use crate::diag;
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::Tokenizer;
use crate::SourceFile;

use self::sema::ContextChecker;

const RECOVERY_DELIMITERS: &[TokenKind] = &[
    TokenKind::SemiColon,
    TokenKind::Comma,
    TokenKind::ParenClose,
    TokenKind::CurlyClose,
    TokenKind::SquareClose,
    TokenKind::Eof,
];

pub struct ParseOutcome {
    pub ast: Ast,
    pub tokenize_errors: usize,
    pub parse_errors: usize,
    pub warnings: usize,
}

pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
    pub errors: usize,
    scopes: Scopes,
    functions: IndexMap<String, Function>,
    anon_composites: u32,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        let mut tokenizer = Tokenizer::new(source);
        let current = tokenizer.next();
        Parser {
            tokenizer,
            current,
            errors: 0,
            scopes: Scopes::new(),
            functions: IndexMap::new(),
            anon_composites: 0,
        }
    }

    pub fn parse_program(mut self) -> ParseOutcome {
        let global_scope = self.scopes.push(Scope::new(ScopeKind::Global, None));

        let mut statements = Vec::new();
        while self.current.kind != TokenKind::Eof {
            if let Some(statement) = self.parse_statement(global_scope) {
                statements.push(statement);
            }
        }

        let source = self.tokenizer.source();
        let ast = Ast {
            global: Block {
                scope: global_scope,
                statements,
            },
            functions: mem::take(&mut self.functions),
            scopes: mem::replace(&mut self.scopes, Scopes::new()),
        };

        let mut checker = ContextChecker::new(source);
        checker.check_program(&ast);

        ParseOutcome {
            ast,
            tokenize_errors: self.tokenizer.errors,
            parse_errors: self.errors + checker.errors,
            warnings: checker.warnings,
        }
    }

    // ---- token management -------------------------------------------------

    pub(crate) fn source_text(&self) -> &'a str {
        &self.tokenizer.source().text
    }

    pub(crate) fn text(&self, token: Token) -> &'a str {
        token.splice.of(self.source_text())
    }

    pub(crate) fn peek(&self) -> Token {
        self.current
    }

    pub(crate) fn match_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Advances to the next token; never advances past EOF.
    pub(crate) fn consume(&mut self) -> Token {
        let current = self.current;
        if current.kind != TokenKind::Eof {
            self.current = self.tokenizer.next();
        }
        current
    }

    /// Rewinds so `checkpoint` becomes the current token again.
    pub(crate) fn rewind_to(&mut self, checkpoint: Token) {
        self.tokenizer.rewind_to(checkpoint);
        self.current = self.tokenizer.next();
    }

    pub(crate) fn error_at(&mut self, token: Token, message: fmt::Arguments) {
        self.errors += 1;
        diag::error(&self.tokenizer.source().name, token.line, token.col, message);
    }

    /// Skips tokens until a recovery delimiter so one bad construct reports
    /// a single error.
    pub(crate) fn try_recover(&mut self) {
        while !RECOVERY_DELIMITERS.contains(&self.current.kind) {
            self.consume();
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> bool {
        if self.match_kind(kind) {
            self.consume();
            return true;
        }
        let current = self.current;
        self.error_at(
            current,
            format_args!(
                "expected {kind:?} but found \"{}\"",
                self.text(current)
            ),
        );
        self.try_recover();
        if self.match_kind(kind) {
            self.consume();
        }
        true
    }

    pub(crate) fn is_type_start(&self) -> bool {
        let kind = self.current.kind;
        kind.is_base_type()
            || kind.is_type_modifier()
            || kind.is_type_qualifier()
            || kind.is_storage_class()
    }

    // ---- statements -------------------------------------------------------

    fn parse_statement(&mut self, scope: ScopeId) -> Option<Node> {
        let kind = self.current.kind;
        if self.is_type_start() {
            return self.parse_declaration(scope);
        }
        match kind {
            TokenKind::If => Some(Node::If(self.parse_if(scope))),
            TokenKind::While => Some(self.parse_while(scope)),
            TokenKind::For => Some(self.parse_for(scope)),
            TokenKind::Return => Some(self.parse_return(scope)),
            TokenKind::Break => {
                let token = self.consume();
                self.expect(TokenKind::SemiColon);
                Some(Node::Break(token))
            }
            TokenKind::Continue => {
                let token = self.consume();
                self.expect(TokenKind::SemiColon);
                Some(Node::Continue(token))
            }
            TokenKind::CurlyOpen => {
                Some(Node::Block(self.parse_block(scope, ScopeKind::Unnamed)))
            }
            TokenKind::SemiColon => {
                self.consume();
                None
            }
            k if k.is_unsupported_keyword() => {
                let token = self.consume();
                self.error_at(
                    token,
                    format_args!("\"{}\" is not supported", self.text(token)),
                );
                self.try_recover();
                if self.match_kind(TokenKind::SemiColon) {
                    self.consume();
                }
                Some(Node::Error)
            }
            _ => {
                if !self.is_expr_start() {
                    let token = self.consume();
                    self.error_at(
                        token,
                        format_args!("unexpected token \"{}\"", self.text(token)),
                    );
                    self.try_recover();
                    if self.match_kind(TokenKind::SemiColon) {
                        self.consume();
                    }
                    return Some(Node::Error);
                }
                let subexpr = self.parse_subexpr(u32::MAX, scope);
                self.expect(TokenKind::SemiColon);
                Some(Node::Subexpr(subexpr))
            }
        }
    }

    fn is_expr_start(&self) -> bool {
        let kind = self.current.kind;
        kind == TokenKind::ParenOpen
            || kind == TokenKind::Sizeof
            || kind == TokenKind::Identifier
            || kind.is_unary_op()
            || kind.is_literal()
    }

    fn parse_block(&mut self, parent: ScopeId, kind: ScopeKind) -> Block {
        let scope = self.scopes.push(Scope::new(kind, Some(parent)));
        self.expect(TokenKind::CurlyOpen);
        let mut statements = Vec::new();
        while !self.match_kind(TokenKind::CurlyClose) && !self.match_kind(TokenKind::Eof) {
            if let Some(statement) = self.parse_statement(scope) {
                statements.push(statement);
            }
        }
        self.expect(TokenKind::CurlyClose);
        Block { scope, statements }
    }

    fn parse_if(&mut self, scope: ScopeId) -> IfNode {
        let condition = if self.match_kind(TokenKind::If) {
            self.consume();
            self.expect(TokenKind::ParenOpen);
            let condition = self.parse_subexpr(u32::MAX, scope);
            self.expect(TokenKind::ParenClose);
            Some(condition)
        } else {
            // final else arm
            None
        };

        let body = self.parse_block(scope, ScopeKind::If);

        let next = if self.match_kind(TokenKind::Else) {
            self.consume();
            Some(Box::new(self.parse_if(scope)))
        } else {
            None
        };

        IfNode {
            condition,
            body,
            next,
        }
    }

    fn parse_while(&mut self, scope: ScopeId) -> Node {
        self.expect(TokenKind::While);
        self.expect(TokenKind::ParenOpen);
        let condition = self.parse_subexpr(u32::MAX, scope);
        self.expect(TokenKind::ParenClose);
        let body = self.parse_block(scope, ScopeKind::While);
        Node::While(WhileNode { condition, body })
    }

    fn parse_for(&mut self, scope: ScopeId) -> Node {
        self.expect(TokenKind::For);
        self.expect(TokenKind::ParenOpen);
        let init = self.parse_subexpr(u32::MAX, scope);
        self.expect(TokenKind::SemiColon);
        let condition = self.parse_subexpr(u32::MAX, scope);
        self.expect(TokenKind::SemiColon);
        let update = self.parse_subexpr(u32::MAX, scope);
        self.expect(TokenKind::ParenClose);
        let body = self.parse_block(scope, ScopeKind::For);
        Node::For(ForNode {
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_return(&mut self, scope: ScopeId) -> Node {
        let token = self.consume();
        let value = if self.match_kind(TokenKind::SemiColon) {
            None
        } else {
            Some(self.parse_subexpr(u32::MAX, scope))
        };
        self.expect(TokenKind::SemiColon);
        Node::Return(ReturnNode { token, value })
    }

    // ---- declarations -----------------------------------------------------

    fn parse_declaration(&mut self, scope: ScopeId) -> Option<Node> {
        let base = self.parse_base_data_type(scope);

        // `struct A { ... };` declares the type and nothing else
        if self.match_kind(TokenKind::SemiColon) && base.is_composite() {
            self.consume();
            return None;
        }

        // trial-parse one declarator to tell functions from variables
        let declarator_start = self.peek();
        let full = self.parse_pointer_suffix(base.clone());

        if !self.match_kind(TokenKind::Identifier) {
            let current = self.current;
            self.error_at(
                current,
                format_args!("expected identifier, found \"{}\"", self.text(current)),
            );
            self.try_recover();
            if self.match_kind(TokenKind::SemiColon) {
                self.consume();
            }
            return Some(Node::Error);
        }
        let identifier = self.consume();

        if self.match_kind(TokenKind::ParenOpen) {
            self.parse_function(full, identifier, scope);
            return None;
        }

        // variable declaration; re-parse the declarator list from its start
        self.rewind_to(declarator_start);

        let mut decls = Vec::new();
        loop {
            let Some((name, mut ty)) = self.parse_declarator(&base) else {
                break;
            };

            let init = if self.match_kind(TokenKind::Assignment) {
                self.consume();
                if self.match_kind(TokenKind::CurlyOpen) {
                    Some(self.parse_init_list(scope))
                } else {
                    Some(self.parse_subexpr(u32::MAX, scope))
                }
            } else {
                None
            };

            // `int a[] = {...}` takes its count from the initializer
            if let DataType::Array { count, .. } = &mut ty {
                if *count == 0 {
                    if let Some(Subexpr::InitList { values, .. }) = &init {
                        *count = values.len() as u64;
                    }
                }
            }

            let name_text = self.text(name).to_string();
            if self.scopes.get(scope).symbols.contains_key(&name_text) {
                self.error_at(
                    name,
                    format_args!("redefinition of \"{name_text}\""),
                );
            } else {
                self.scopes
                    .get_mut(scope)
                    .symbols
                    .insert(name_text, ty.clone());
            }

            decls.push(DeclInfo { ty, name, init });

            if self.match_kind(TokenKind::Comma) {
                self.consume();
            } else {
                break;
            }
        }
        self.expect(TokenKind::SemiColon);

        Some(Node::Declaration(Declaration { decls }))
    }

    /// One declarator: `* const`-style pointer layers, the name, `[n]`
    /// suffixes.
    fn parse_declarator(&mut self, base: &DataType) -> Option<(Token, DataType)> {
        let ty = self.parse_pointer_suffix(base.clone());
        if !self.match_kind(TokenKind::Identifier) {
            let current = self.current;
            self.error_at(
                current,
                format_args!("expected identifier, found \"{}\"", self.text(current)),
            );
            self.try_recover();
            return None;
        }
        let name = self.consume();
        Some((name, self.parse_array_suffixes(ty)))
    }

    fn parse_pointer_suffix(&mut self, mut ty: DataType) -> DataType {
        while self.match_kind(TokenKind::Star) {
            self.consume();
            let mut pointer_flags = Qualifiers::empty();
            while self.match_kind(TokenKind::Const) || self.match_kind(TokenKind::Volatile) {
                if self.match_kind(TokenKind::Const) {
                    pointer_flags |= Qualifiers::CONST;
                } else {
                    pointer_flags |= Qualifiers::VOLATILE;
                }
                self.consume();
            }
            ty = DataType::Pointer {
                to: Box::new(ty),
                flags: pointer_flags,
            };
        }
        ty
    }

    /// `[n]` suffixes; `a[2][3]` is two of three-element rows.
    fn parse_array_suffixes(&mut self, base: DataType) -> DataType {
        let mut counts = Vec::new();
        while self.match_kind(TokenKind::SquareOpen) {
            self.consume();
            if self.match_kind(TokenKind::SquareClose) {
                self.consume();
                counts.push(0);
                continue;
            }
            let count_token = self.consume();
            let count = if count_token.kind.is_integer_literal() {
                crate::lexer::number::integer_value(self.text(count_token)).unwrap_or(0)
            } else {
                self.error_at(
                    count_token,
                    format_args!("array size must be an integer literal"),
                );
                0
            };
            self.expect(TokenKind::SquareClose);
            counts.push(count.max(0) as u64);
        }
        let mut ty = base;
        for count in counts.into_iter().rev() {
            ty = DataType::Array {
                of: Box::new(ty),
                count,
            };
        }
        ty
    }

    fn parse_function(&mut self, return_type: DataType, identifier: Token, scope: ScopeId) {
        self.expect(TokenKind::ParenOpen);

        let body_scope = self.scopes.push(Scope::new(ScopeKind::Function, Some(scope)));
        let name_text = self.text(identifier).to_string();
        self.scopes.get_mut(body_scope).func_name = Some(name_text.clone());

        let mut params = Vec::new();
        let mut is_variadic = false;
        loop {
            if self.match_kind(TokenKind::Ellipsis) {
                self.consume();
                is_variadic = true;
                break;
            }
            if !self.is_type_start() {
                break;
            }
            let ty = self.parse_data_type(scope);
            // `f(void)` declares no parameters
            if ty == DataType::Void && self.match_kind(TokenKind::ParenClose) {
                break;
            }
            if !self.match_kind(TokenKind::Identifier) {
                let current = self.current;
                self.error_at(
                    current,
                    format_args!("expected parameter name, found \"{}\"", self.text(current)),
                );
                self.try_recover();
                break;
            }
            let param_name = self.consume();
            // array parameters decay to pointers
            let ty = match self.parse_array_suffixes(ty) {
                DataType::Array { of, .. } => DataType::pointer_to(*of),
                other => other,
            };

            let param_text = self.text(param_name).to_string();
            if self.scopes.get(body_scope).symbols.contains_key(&param_text) {
                self.error_at(
                    param_name,
                    format_args!("duplicate parameter \"{param_text}\""),
                );
            } else {
                self.scopes
                    .get_mut(body_scope)
                    .symbols
                    .insert(param_text, ty.clone());
            }
            params.push(Param {
                ty,
                name: param_name,
            });

            if self.match_kind(TokenKind::Comma) {
                self.consume();
            } else {
                break;
            }
        }
        self.expect(TokenKind::ParenClose);

        let (is_extern, body) = if self.match_kind(TokenKind::SemiColon) {
            self.consume();
            (true, None)
        } else {
            self.expect(TokenKind::CurlyOpen);
            let mut statements = Vec::new();
            while !self.match_kind(TokenKind::CurlyClose) && !self.match_kind(TokenKind::Eof) {
                if let Some(statement) = self.parse_statement(body_scope) {
                    statements.push(statement);
                }
            }
            self.expect(TokenKind::CurlyClose);
            (
                false,
                Some(Block {
                    scope: body_scope,
                    statements,
                }),
            )
        };

        let function = Function {
            return_type,
            name: identifier,
            params,
            is_variadic,
            is_extern,
            body,
        };

        match self.functions.get(&name_text) {
            Some(existing) if !existing.is_extern && !is_extern => {
                self.error_at(
                    identifier,
                    format_args!("redefinition of function \"{name_text}\""),
                );
            }
            Some(existing) if !existing.is_extern && is_extern => {
                // prototype after definition changes nothing
            }
            _ => {
                self.functions.insert(name_text, function);
            }
        }
    }

    // ---- types ------------------------------------------------------------

    /// A full type as it appears in casts, `sizeof` and parameters: base
    /// plus pointer layers.
    pub(crate) fn parse_data_type(&mut self, scope: ScopeId) -> DataType {
        let base = self.parse_base_data_type(scope);
        self.parse_pointer_suffix(base)
    }

    fn parse_base_data_type(&mut self, scope: ScopeId) -> DataType {
        let mut flags = Qualifiers::empty();
        let mut base: Option<TokenKind> = None;
        let mut composite: Option<DataType> = None;
        let mut long_count = 0;
        let type_token = self.current;

        loop {
            let kind = self.current.kind;
            match kind {
                TokenKind::Const => flags |= Qualifiers::CONST,
                TokenKind::Volatile => flags |= Qualifiers::VOLATILE,
                TokenKind::Extern => flags |= Qualifiers::EXTERN,
                TokenKind::Static => flags |= Qualifiers::STATIC,
                TokenKind::Inline => flags |= Qualifiers::INLINE,
                TokenKind::Register => flags |= Qualifiers::REGISTER,
                TokenKind::Unsigned => flags |= Qualifiers::UNSIGNED,
                TokenKind::Signed => flags |= Qualifiers::SIGNED,
                TokenKind::Short => flags |= Qualifiers::SHORT,
                TokenKind::Long => long_count += 1,
                TokenKind::Int
                | TokenKind::Char
                | TokenKind::Float
                | TokenKind::Double
                | TokenKind::Void => {
                    if base.is_some() {
                        self.error_at(
                            self.current,
                            format_args!("two or more data types in declaration"),
                        );
                    }
                    base = Some(kind);
                }
                TokenKind::Struct => {
                    self.consume();
                    let name = self.parse_composite(scope, CompositeKind::Struct);
                    composite = Some(DataType::Struct { name });
                    continue;
                }
                TokenKind::Union => {
                    self.consume();
                    let name = self.parse_composite(scope, CompositeKind::Union);
                    composite = Some(DataType::Union { name });
                    continue;
                }
                _ => break,
            }
            self.consume();
        }

        if long_count >= 2 {
            flags |= Qualifiers::LONG_LONG;
        } else if long_count == 1 {
            flags |= Qualifiers::LONG;
        }
        if flags.contains(Qualifiers::SHORT)
            && flags.intersects(Qualifiers::LONG | Qualifiers::LONG_LONG)
        {
            self.error_at(type_token, format_args!("both short and long in declaration"));
            flags -= Qualifiers::SHORT;
        }
        if flags.contains(Qualifiers::SIGNED) && flags.contains(Qualifiers::UNSIGNED) {
            self.error_at(
                type_token,
                format_args!("both signed and unsigned in declaration"),
            );
            flags -= Qualifiers::UNSIGNED;
        }

        if let Some(composite) = composite {
            return composite;
        }
        match base {
            Some(TokenKind::Void) => DataType::Void,
            Some(kind @ (TokenKind::Float | TokenKind::Double)) => DataType::Primary {
                base: kind,
                flags: flags
                    - (Qualifiers::UNSIGNED
                        | Qualifiers::SIGNED
                        | Qualifiers::SHORT
                        | Qualifiers::LONG
                        | Qualifiers::LONG_LONG),
            },
            Some(kind) => {
                let mut flags = flags;
                if !flags.contains(Qualifiers::UNSIGNED) {
                    flags |= Qualifiers::SIGNED;
                }
                DataType::Primary { base: kind, flags }
            }
            // modifiers alone default to int
            None => {
                let mut flags = flags;
                if !flags.contains(Qualifiers::UNSIGNED) {
                    flags |= Qualifiers::SIGNED;
                }
                DataType::Primary {
                    base: TokenKind::Int,
                    flags,
                }
            }
        }
    }

    /// Parses a composite reference or definition after the `struct`/`union`
    /// keyword; returns the composite's name.
    fn parse_composite(&mut self, scope: ScopeId, kind: CompositeKind) -> String {
        let name = if self.match_kind(TokenKind::Identifier) {
            let token = self.consume();
            self.text(token).to_string()
        } else {
            self.anon_composites += 1;
            format!(".anon{}", self.anon_composites)
        };

        if !self.match_kind(TokenKind::CurlyOpen) {
            // reference; record a forward declaration in this scope unless
            // the chain already knows the name
            let known = self.scopes.find_composite(scope, &name).is_some()
                || self.scopes.get(scope).composites.contains_key(&name);
            if !known {
                self.scopes
                    .get_mut(scope)
                    .composites
                    .insert(name.clone(), Composite::declared(kind, &name));
            }
            return name;
        }

        let already_defined = self
            .scopes
            .get(scope)
            .composites
            .get(&name)
            .map(|c| c.defined)
            .unwrap_or(false);
        if already_defined {
            let token = self.current;
            self.error_at(token, format_args!("redefinition of \"{name}\""));
        }

        self.consume(); // '{'
        let mut composite = Composite::declared(kind, &name);
        composite.defined = true;

        while !self.match_kind(TokenKind::CurlyClose) && !self.match_kind(TokenKind::Eof) {
            if !self.is_type_start() {
                let current = self.current;
                self.error_at(
                    current,
                    format_args!("expected member declaration, found \"{}\"", self.text(current)),
                );
                self.try_recover();
                if self.match_kind(TokenKind::SemiColon) {
                    self.consume();
                } else if !self.match_kind(TokenKind::CurlyClose)
                    && !self.match_kind(TokenKind::Eof)
                {
                    self.consume();
                }
                continue;
            }
            let member_base = self.parse_base_data_type(scope);
            loop {
                let Some((member_name, member_ty)) = self.parse_declarator(&member_base) else {
                    break;
                };
                // members hold values; their composites need a layout
                let mut layout_ty = &member_ty;
                while let DataType::Array { of, .. } = layout_ty {
                    layout_ty = of;
                }
                if let Some(inner) = layout_ty.composite_name() {
                    if self.scopes.find_composite(scope, inner).is_none() {
                        self.error_at(
                            member_name,
                            format_args!("member has incomplete type \"{layout_ty}\""),
                        );
                    }
                }
                let member_text = self.text(member_name).to_string();
                if composite.members.contains_key(&member_text) {
                    self.error_at(
                        member_name,
                        format_args!("duplicate member \"{member_text}\""),
                    );
                } else {
                    composite.members.insert(
                        member_text,
                        Member {
                            ty: member_ty,
                            offset: 0,
                        },
                    );
                }
                if self.match_kind(TokenKind::Comma) {
                    self.consume();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::SemiColon);
        }
        self.expect(TokenKind::CurlyClose);

        self.scopes
            .get_mut(scope)
            .composites
            .insert(name.clone(), composite);
        name
    }
}

//! Precedence-climbing subexpression parser.

use crate::ast::scope::ScopeId;
use crate::ast::{FunctionCall, SizeOfArg, Subexpr};
use crate::lexer::token::{precedence, Token, TokenKind};

use super::Parser;

impl<'a> Parser<'a> {
    /// Builds a left-to-right tree: the loop extends while the next operator
    /// binds tighter than the current precedence, and a tie breaks the loop.
    pub(crate) fn parse_subexpr(&mut self, limit: u32, scope: ScopeId) -> Subexpr {
        let mut left = self.parse_primary(scope);

        while self.current.kind.is_binary_op() {
            if precedence(self.current.kind) >= limit {
                break;
            }
            let op = self.consume();

            let right = if op.kind == TokenKind::SquareOpen {
                let index = self.parse_subexpr(u32::MAX, scope);
                self.expect(TokenKind::SquareClose);
                index
            } else if op.kind.is_member_access_op() {
                // member names resolve against the struct, not the scope
                if self.match_kind(TokenKind::Identifier) {
                    Subexpr::Leaf(self.consume())
                } else {
                    let current = self.peek();
                    self.error_at(
                        current,
                        format_args!("expected a member name, found \"{}\"", self.text(current)),
                    );
                    self.try_recover();
                    Subexpr::Error
                }
            } else {
                self.parse_subexpr(precedence(op.kind), scope)
            };

            left = Subexpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        left
    }

    pub(crate) fn parse_primary(&mut self, scope: ScopeId) -> Subexpr {
        let kind = self.current.kind;

        if kind == TokenKind::ParenOpen {
            let paren = self.consume();
            // a type in parentheses is a cast applied to the next primary
            if self.is_type_start() {
                let to = self.parse_data_type(scope);
                self.expect(TokenKind::ParenClose);
                let operand = self.parse_primary(scope);
                return Subexpr::Cast {
                    paren,
                    to,
                    operand: Box::new(operand),
                };
            }
            let inside = self.parse_subexpr(u32::MAX, scope);
            self.expect(TokenKind::ParenClose);
            return Subexpr::Paren(Box::new(inside));
        }

        if kind == TokenKind::Sizeof {
            return self.parse_sizeof(scope);
        }

        if kind.is_unary_op() {
            let op = self.consume();
            let operand = self.parse_primary(scope);
            return Subexpr::Unary {
                op,
                operand: Box::new(operand),
            };
        }

        if kind == TokenKind::Identifier {
            let identifier = self.consume();
            if self.match_kind(TokenKind::ParenOpen) {
                return self.parse_call(identifier, scope);
            }
            let name = self.text(identifier);
            if self.functions.contains_key(name) {
                self.error_at(
                    identifier,
                    format_args!("function \"{name}\" used without a call"),
                );
                return Subexpr::Error;
            }
            if self.scopes.find_symbol(scope, name).is_none() {
                self.error_at(
                    identifier,
                    format_args!("undeclared identifier \"{name}\""),
                );
            }
            return Subexpr::Leaf(identifier);
        }

        if kind == TokenKind::CurlyOpen {
            return self.parse_init_list(scope);
        }

        if kind.is_literal() {
            return Subexpr::Leaf(self.consume());
        }

        let current = self.current;
        self.error_at(
            current,
            format_args!(
                "unexpected token \"{}\", expected a subexpression",
                self.text(current)
            ),
        );
        self.try_recover();
        Subexpr::Error
    }

    fn parse_call(&mut self, identifier: Token, scope: ScopeId) -> Subexpr {
        let known = self.functions.contains_key(self.text(identifier));
        if !known {
            self.error_at(
                identifier,
                format_args!("call to undeclared function \"{}\"", self.text(identifier)),
            );
        }

        self.expect(TokenKind::ParenOpen);
        let mut args = Vec::new();
        if !self.match_kind(TokenKind::ParenClose) {
            loop {
                args.push(self.parse_subexpr(precedence(TokenKind::Comma), scope));
                if self.match_kind(TokenKind::Comma) {
                    self.consume();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::ParenClose);

        if known {
            Subexpr::Call(FunctionCall {
                name: identifier,
                args,
            })
        } else {
            Subexpr::Error
        }
    }

    fn parse_sizeof(&mut self, scope: ScopeId) -> Subexpr {
        let token = self.consume();
        if self.match_kind(TokenKind::ParenOpen) {
            self.consume();
            if self.is_type_start() {
                let ty = self.parse_data_type(scope);
                self.expect(TokenKind::ParenClose);
                return Subexpr::SizeOf {
                    token,
                    of: SizeOfArg::Type(ty),
                };
            }
            let inner = self.parse_subexpr(u32::MAX, scope);
            self.expect(TokenKind::ParenClose);
            return Subexpr::SizeOf {
                token,
                of: SizeOfArg::Expr(Box::new(inner)),
            };
        }
        let operand = self.parse_primary(scope);
        Subexpr::SizeOf {
            token,
            of: SizeOfArg::Expr(Box::new(operand)),
        }
    }

    pub(crate) fn parse_init_list(&mut self, scope: ScopeId) -> Subexpr {
        let brace = self.consume();
        let mut values = Vec::new();
        if !self.match_kind(TokenKind::CurlyClose) {
            loop {
                let value = if self.match_kind(TokenKind::CurlyOpen) {
                    self.parse_init_list(scope)
                } else {
                    self.parse_subexpr(precedence(TokenKind::Comma), scope)
                };
                values.push(value);
                if self.match_kind(TokenKind::Comma) {
                    self.consume();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::CurlyClose);
        Subexpr::InitList { brace, values }
    }
}

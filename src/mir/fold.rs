//! Constant folding over pure arithmetic subtrees: integer `+ - * /`,
//! unary `- +`, and numeric casts of constants. Division by zero aborts the
//! fold and leaves the node intact. The pass is idempotent.

use crate::ast::datatype::DataType;
use crate::ast::{Ast, Node, Number, Subexpr};
use crate::lexer::token::TokenKind;
use crate::lexer::number::{char_value, float_value, integer_value};

pub fn fold_program(ast: &mut Ast, source_text: &str) {
    for statement in &mut ast.global.statements {
        fold_node(statement, source_text);
    }
    for (_, function) in ast.functions.iter_mut() {
        if let Some(body) = &mut function.body {
            for statement in &mut body.statements {
                fold_node(statement, source_text);
            }
        }
    }
}

fn fold_node(node: &mut Node, source: &str) {
    match node {
        Node::Subexpr(subexpr) => {
            fold_subexpr(subexpr, source);
        }
        Node::Declaration(declaration) => {
            for decl in &mut declaration.decls {
                if let Some(init) = &mut decl.init {
                    fold_subexpr(init, source);
                }
            }
        }
        Node::Block(block) => {
            for statement in &mut block.statements {
                fold_node(statement, source);
            }
        }
        Node::If(if_node) => {
            let mut arm = Some(if_node);
            while let Some(current) = arm {
                if let Some(condition) = &mut current.condition {
                    fold_subexpr(condition, source);
                }
                for statement in &mut current.body.statements {
                    fold_node(statement, source);
                }
                arm = current.next.as_deref_mut();
            }
        }
        Node::While(while_node) => {
            fold_subexpr(&mut while_node.condition, source);
            for statement in &mut while_node.body.statements {
                fold_node(statement, source);
            }
        }
        Node::For(for_node) => {
            fold_subexpr(&mut for_node.init, source);
            fold_subexpr(&mut for_node.condition, source);
            fold_subexpr(&mut for_node.update, source);
            for statement in &mut for_node.body.statements {
                fold_node(statement, source);
            }
        }
        Node::Return(return_node) => {
            if let Some(value) = &mut return_node.value {
                fold_subexpr(value, source);
            }
        }
        Node::Break(_) | Node::Continue(_) | Node::Error => {}
    }
}

/// Folds in place; returns the node's constant value when it has one.
pub fn fold_subexpr(expr: &mut Subexpr, source: &str) -> Option<Number> {
    match expr {
        Subexpr::Leaf(token) => literal_value(token.kind, token.splice.of(source)),
        Subexpr::Folded(number) => Some(*number),
        Subexpr::Paren(inner) => fold_subexpr(inner, source),
        Subexpr::Binary { op, left, right } => {
            let left_value = fold_subexpr(left, source);
            let right_value = fold_subexpr(right, source);
            let (Some(Number::Int(a)), Some(Number::Int(b))) = (left_value, right_value) else {
                return None;
            };
            let result = match op.kind {
                TokenKind::Plus => a.wrapping_add(b),
                TokenKind::Minus => a.wrapping_sub(b),
                TokenKind::Star => a.wrapping_mul(b),
                TokenKind::Slash => {
                    if b == 0 {
                        return None;
                    }
                    a / b
                }
                _ => return None,
            };
            *expr = Subexpr::Folded(Number::Int(result));
            Some(Number::Int(result))
        }
        Subexpr::Unary { op, operand } => {
            let value = fold_subexpr(operand, source);
            let Some(Number::Int(a)) = value else {
                return None;
            };
            let result = match op.kind {
                TokenKind::Minus => a.wrapping_neg(),
                TokenKind::Plus => a,
                _ => return None,
            };
            *expr = Subexpr::Folded(Number::Int(result));
            Some(Number::Int(result))
        }
        Subexpr::Cast { to, operand, .. } => {
            let value = fold_subexpr(operand, source)?;
            let result = cast_number(value, to)?;
            *expr = Subexpr::Folded(result);
            Some(result)
        }
        _ => None,
    }
}

/// Read-only evaluation, used for global initializers.
pub fn const_value(expr: &Subexpr, source: &str) -> Option<Number> {
    match expr {
        Subexpr::Leaf(token) => literal_value(token.kind, token.splice.of(source)),
        Subexpr::Folded(number) => Some(*number),
        Subexpr::Paren(inner) => const_value(inner, source),
        Subexpr::Binary { op, left, right } => {
            let (Number::Int(a), Number::Int(b)) =
                (const_value(left, source)?, const_value(right, source)?)
            else {
                return None;
            };
            Some(Number::Int(match op.kind {
                TokenKind::Plus => a.wrapping_add(b),
                TokenKind::Minus => a.wrapping_sub(b),
                TokenKind::Star => a.wrapping_mul(b),
                TokenKind::Slash if b != 0 => a / b,
                _ => return None,
            }))
        }
        Subexpr::Unary { op, operand } => {
            let Number::Int(a) = const_value(operand, source)? else {
                return None;
            };
            Some(Number::Int(match op.kind {
                TokenKind::Minus => a.wrapping_neg(),
                TokenKind::Plus => a,
                _ => return None,
            }))
        }
        Subexpr::Cast { to, operand, .. } => cast_number(const_value(operand, source)?, to),
        _ => None,
    }
}

fn literal_value(kind: TokenKind, text: &str) -> Option<Number> {
    match kind {
        TokenKind::NumericFloat => float_value(text).map(|v| Number::Float(v as f32)),
        TokenKind::NumericDouble => float_value(text).map(Number::Double),
        TokenKind::CharLiteral => char_value(text).map(Number::Int),
        k if k.is_integer_literal() => integer_value(text).map(Number::Int),
        _ => None,
    }
}

fn cast_number(value: Number, to: &DataType) -> Option<Number> {
    if to.is_primary(TokenKind::Float) {
        let v = match value {
            Number::Int(v) => v as f32,
            Number::Float(v) => v,
            Number::Double(v) => v as f32,
        };
        return Some(Number::Float(v));
    }
    if to.is_primary(TokenKind::Double) {
        let v = match value {
            Number::Int(v) => v as f64,
            Number::Float(v) => v as f64,
            Number::Double(v) => v,
        };
        return Some(Number::Double(v));
    }
    if to.is_integer() {
        let v = match value {
            Number::Int(v) => v,
            Number::Float(v) => v as i64,
            Number::Double(v) => v as i64,
        };
        return Some(Number::Int(v));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::token::{Splice, Token};

    fn leaf(source: &str, start: usize, len: usize) -> Subexpr {
        Subexpr::Leaf(Token {
            kind: TokenKind::NumericDec,
            splice: Splice { start, len },
            line: 1,
            col: 1,
        })
    }

    fn binary(op_kind: TokenKind, left: Subexpr, right: Subexpr) -> Subexpr {
        Subexpr::Binary {
            op: Token {
                kind: op_kind,
                splice: Splice::EMPTY,
                line: 1,
                col: 1,
            },
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn folds_pure_integer_arithmetic() {
        let source = "2 3 4";
        let product = binary(TokenKind::Star, leaf(source, 2, 1), leaf(source, 4, 1));
        let mut sum = binary(TokenKind::Plus, leaf(source, 0, 1), product);
        assert_eq!(fold_subexpr(&mut sum, source), Some(Number::Int(14)));
        assert!(matches!(sum, Subexpr::Folded(Number::Int(14))));
    }

    #[test]
    fn folding_is_idempotent() {
        let source = "2 3 4";
        let mut sum = binary(
            TokenKind::Plus,
            leaf(source, 0, 1),
            binary(TokenKind::Star, leaf(source, 2, 1), leaf(source, 4, 1)),
        );
        fold_subexpr(&mut sum, source);
        assert_eq!(fold_subexpr(&mut sum, source), Some(Number::Int(14)));
        assert!(matches!(sum, Subexpr::Folded(Number::Int(14))));
    }

    #[test]
    fn division_by_zero_aborts_the_fold() {
        let source = "4 0";
        let mut quotient = binary(TokenKind::Slash, leaf(source, 0, 1), leaf(source, 2, 1));
        assert_eq!(fold_subexpr(&mut quotient, source), None);
        assert!(matches!(quotient, Subexpr::Binary { .. }));
    }
}

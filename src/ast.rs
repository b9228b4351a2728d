//! Parse-tree node families. Every node kind is a sum-type variant; child
//! links are owning boxes, scope back-references are arena ids.

pub mod composite;
pub mod datatype;
pub mod scope;

use indexmap::IndexMap;

use crate::lexer::token::Token;

use self::datatype::DataType;
use self::scope::{ScopeId, Scopes};

#[derive(Debug)]
pub enum Node {
    Subexpr(Subexpr),
    Declaration(Declaration),
    Block(Block),
    If(IfNode),
    While(WhileNode),
    For(ForNode),
    Return(ReturnNode),
    Break(Token),
    Continue(Token),
    Error,
}

#[derive(Debug)]
pub struct Block {
    pub scope: ScopeId,
    pub statements: Vec<Node>,
}

#[derive(Debug)]
pub struct IfNode {
    /// `None` for a final `else` arm.
    pub condition: Option<Subexpr>,
    pub body: Block,
    pub next: Option<Box<IfNode>>,
}

#[derive(Debug)]
pub struct WhileNode {
    pub condition: Subexpr,
    pub body: Block,
}

#[derive(Debug)]
pub struct ForNode {
    pub init: Subexpr,
    pub condition: Subexpr,
    pub update: Subexpr,
    pub body: Block,
}

#[derive(Debug)]
pub struct ReturnNode {
    pub token: Token,
    pub value: Option<Subexpr>,
}

#[derive(Debug)]
pub struct Declaration {
    pub decls: Vec<DeclInfo>,
}

#[derive(Debug)]
pub struct DeclInfo {
    pub ty: DataType,
    pub name: Token,
    pub init: Option<Subexpr>,
}

#[derive(Debug)]
pub enum Subexpr {
    Paren(Box<Subexpr>),
    Binary {
        op: Token,
        left: Box<Subexpr>,
        right: Box<Subexpr>,
    },
    Unary {
        op: Token,
        operand: Box<Subexpr>,
    },
    Leaf(Token),
    Call(FunctionCall),
    Cast {
        paren: Token,
        to: DataType,
        operand: Box<Subexpr>,
    },
    SizeOf {
        token: Token,
        of: SizeOfArg,
    },
    InitList {
        brace: Token,
        values: Vec<Subexpr>,
    },
    /// Leaf produced by the constant folder; rendered in decimal on emission.
    Folded(Number),
    Error,
}

#[derive(Debug)]
pub enum SizeOfArg {
    Type(DataType),
    Expr(Box<Subexpr>),
}

#[derive(Debug)]
pub struct FunctionCall {
    pub name: Token,
    pub args: Vec<Subexpr>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f32),
    Double(f64),
}

#[derive(Debug)]
pub struct Param {
    pub ty: DataType,
    pub name: Token,
}

#[derive(Debug)]
pub struct Function {
    pub return_type: DataType,
    pub name: Token,
    pub params: Vec<Param>,
    pub is_variadic: bool,
    /// Declared without a body; participates in call checking only.
    pub is_extern: bool,
    pub body: Option<Block>,
}

#[derive(Debug)]
pub struct Ast {
    pub global: Block,
    pub functions: IndexMap<String, Function>,
    pub scopes: Scopes,
}

impl Subexpr {
    /// A representative token for error positions.
    pub fn token(&self) -> Option<Token> {
        match self {
            Subexpr::Paren(inner) => inner.token(),
            Subexpr::Binary { op, left, .. } => left.token().or(Some(*op)),
            Subexpr::Unary { op, .. } => Some(*op),
            Subexpr::Leaf(token) => Some(*token),
            Subexpr::Call(call) => Some(call.name),
            Subexpr::Cast { paren, .. } => Some(*paren),
            Subexpr::SizeOf { token, .. } => Some(*token),
            Subexpr::InitList { brace, .. } => Some(*brace),
            Subexpr::Folded(_) | Subexpr::Error => None,
        }
    }
}

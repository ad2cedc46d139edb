//! Syntax tree produced by the [parser](super). All sum types are closed:
//! code generation matches on them exhaustively.
use crate::lexer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-`
    Negate,
    /// `!`
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Remainder,
    Multiply,
    Divide,
    Power,
}

/// A type annotation such as `Foo` or `List<Foo>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub name: Box<str>,
    pub argument: Option<Box<Type>>,
}

impl Type {
    pub fn named(name: &str) -> Self {
        Self {
            name: Box::from(name),
            argument: None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.argument {
            Some(argument) => write!(f, "{}<{argument}>", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    String(Box<str>),
    Variable(Box<str>),
    Call {
        callee: Box<str>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// The target is a [`Expr::Variable`], [`Expr::Member`] or [`Expr::Subscript`].
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        field: Box<str>,
    },
    Subscript {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    New {
        class: Type,
    },
}

impl Expr {
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn variable(name: &str) -> Self {
        Expr::Variable(Box::from(name))
    }
}

/// One name in a `let`, a parameter list or a class body.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: Box<str>,
    pub ty: Option<Type>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Let(Vec<VarDecl>),
    If {
        condition: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Box<str>,
    pub params: Vec<VarDecl>,
    pub result: Option<Type>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub name: Box<str>,
    pub fields: Vec<VarDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Import(Box<str>),
    Class(Class),
    Function(Function),
    Global(Vec<VarDecl>),
}

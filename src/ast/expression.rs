use std::rc::Rc;

use crate::lexer::Token;

use super::{FuncDecl, VarDecl};

/// An expression. `head` is the token diagnostics anchor to.
#[derive(Debug, Clone)]
pub struct Expr {
    pub head: Token,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Number(Token),
    Char(Token),
    Str(Token),
    Null(Token),
    Bool(Token),
    Variable(VariableExpr),
    FuncCall(FuncCallExpr),
    DotAccess(DotAccessExpr),
}

#[derive(Debug, Clone)]
pub struct VariableExpr {
    pub identifier: Token,
    /// Declaration this use refers to; written by the linker.
    pub decl: Option<Rc<VarDecl>>,
}

#[derive(Debug, Clone)]
pub struct FuncCallExpr {
    /// An identifier, an operator token, or an operator keyword
    /// (`set`, `deref`, `addr`, `at`).
    pub callee: Token,
    pub args: Vec<Expr>,
    /// The called function; written by the linker for identifier callees.
    pub callee_decl: Option<Rc<FuncDecl>>,
}

#[derive(Debug, Clone)]
pub struct DotAccessExpr {
    pub left: Box<Expr>,
    pub right: Token,
    /// Whether the left operand is a pointer to a struct (`->` in C);
    /// written by the typechecker.
    pub is_left_pointer: bool,
}

impl Expr {
    pub fn number(token: Token) -> Self {
        Self {
            head: token,
            kind: ExprKind::Number(token),
        }
    }

    pub fn chr(token: Token) -> Self {
        Self {
            head: token,
            kind: ExprKind::Char(token),
        }
    }

    pub fn string(token: Token) -> Self {
        Self {
            head: token,
            kind: ExprKind::Str(token),
        }
    }

    pub fn null(token: Token) -> Self {
        Self {
            head: token,
            kind: ExprKind::Null(token),
        }
    }

    pub fn boolean(token: Token) -> Self {
        Self {
            head: token,
            kind: ExprKind::Bool(token),
        }
    }

    pub fn variable(identifier: Token) -> Self {
        Self {
            head: identifier,
            kind: ExprKind::Variable(VariableExpr {
                identifier,
                decl: None,
            }),
        }
    }

    pub fn func_call(callee: Token, args: Vec<Expr>) -> Self {
        Self {
            head: callee,
            kind: ExprKind::FuncCall(FuncCallExpr {
                callee,
                args,
                callee_decl: None,
            }),
        }
    }

    pub fn dot_access(left: Expr, right: Token) -> Self {
        Self {
            head: left.head,
            kind: ExprKind::DotAccess(DotAccessExpr {
                left: Box::new(left),
                right,
                is_left_pointer: false,
            }),
        }
    }
}

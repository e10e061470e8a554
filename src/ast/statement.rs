use std::cell::RefCell;
use std::rc::Rc;

use crate::lexer::Token;

use super::{DataType, Expr};

#[derive(Debug, Clone)]
pub enum Stmt {
    Struct(Rc<StructDecl>),
    Func(Rc<FuncDecl>),
    VarDecl(VarDeclStmt),
    If(IfStmt),
    For(ForStmt),
    While(WhileStmt),
    Return(ReturnStmt),
    Expr(Expr),
}

#[derive(Debug)]
pub struct StructDecl {
    pub identifier: Token,
    pub fields: Vec<Field>,
}

#[derive(Debug)]
pub struct Field {
    pub data_type: DataType,
    pub identifier: Token,
}

#[derive(Debug)]
pub struct FuncDecl {
    pub return_type: DataType,
    pub identifier: Token,
    pub params: Vec<Rc<VarDecl>>,
    /// Empty for prototypes. Behind a `RefCell` so the linker and
    /// typechecker can annotate body expressions while the function table
    /// (which shares this node) is being consulted.
    pub body: RefCell<Vec<Stmt>>,
    pub is_definition: bool,
    pub public: bool,
}

/// A variable declaration: global, local, parameter, or the synthesized
/// `for` counter (which has no written type).
#[derive(Debug)]
pub struct VarDecl {
    pub data_type: Option<DataType>,
    pub identifier: Token,
    pub is_global: bool,
}

#[derive(Debug, Clone)]
pub struct VarDeclStmt {
    pub decl: Rc<VarDecl>,
    pub initializer: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub if_branch: IfBranch,
    pub elif_branches: Vec<IfBranch>,
    pub else_branch: Option<IfBranch>,
}

/// One branch of an `if` chain. `cond` is absent only on `else`.
#[derive(Debug, Clone)]
pub struct IfBranch {
    pub cond: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub counter: Rc<VarDecl>,
    pub to: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub keyword: Token,
    pub expr: Option<Expr>,
    /// Return type and name of the enclosing function, captured at parse
    /// time for the typechecker.
    pub return_type: DataType,
    pub function_identifier: Token,
}

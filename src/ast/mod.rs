//! The abstract syntax tree.
//!
//! Nodes carry the tokens they were parsed from so every later stage can
//! anchor diagnostics. The linker and typechecker annotate nodes in place:
//! variable uses get a handle to their declaration, calls to their callee,
//! and struct-typed data types to the struct table.

mod data_type;
mod expression;
mod statement;

pub use data_type::*;
pub use expression::*;
pub use statement::*;

use crate::source::SourceId;

/// Index into the linker's struct table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructId(pub u32);

/// The top-level statements of one source file.
#[derive(Debug)]
pub struct ParsedFile {
    pub source: SourceId,
    pub stmts: Vec<Stmt>,
}

/// A whole compilation unit: the entry file plus everything pulled in via
/// `load`, in load order.
#[derive(Debug, Default)]
pub struct Program {
    pub files: Vec<ParsedFile>,
}

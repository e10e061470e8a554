//! Linker: name and scope resolution.
//!
//! Two passes over the merged program. The first collects the global struct,
//! function and variable tables and enforces uniqueness; the second walks
//! every function body, attaches declarations to variable uses and callees to
//! calls, checks call and operator arity, and binds struct-typed data types
//! to the struct table.

mod scope;

pub use scope::*;

use std::rc::Rc;

use crate::ast::{
    DataType, Expr, ExprKind, ForStmt, FuncCallExpr, FuncDecl, IfBranch, IfStmt, Program,
    ReturnStmt, Stmt, StructDecl, StructId, VarDecl, VarDeclStmt, VariableExpr, WhileStmt,
};
use crate::diagnostics::{self, Level};
use crate::intern::{Interner, Keywords};
use crate::lexer::{Token, TokenKind};
use crate::source::SourceMap;

/// The global symbol tables built by the linker, consumed by the typechecker
/// and the emitter. Entries are in source order.
#[derive(Debug)]
pub struct SymbolTable {
    pub structs: Vec<Rc<StructDecl>>,
    pub funcs: Vec<Rc<FuncDecl>>,
}

pub struct Linker<'a> {
    sources: &'a SourceMap,
    interner: &'a Interner,
    kw: &'a Keywords,
    structs: Vec<Rc<StructDecl>>,
    funcs: Vec<Rc<FuncDecl>>,
    scope: Scope,
    main_found: bool,
    error_occurred: bool,
    error_count: u32,
}

impl<'a> Linker<'a> {
    pub fn new(sources: &'a SourceMap, interner: &'a Interner, kw: &'a Keywords) -> Self {
        Self {
            sources,
            interner,
            kw,
            structs: vec![],
            funcs: vec![],
            scope: Scope::new(),
            main_found: false,
            error_occurred: false,
            error_count: 0,
        }
    }

    pub fn run(mut self, program: &mut Program) -> (SymbolTable, bool) {
        for file in &program.files {
            for stmt in &file.stmts {
                self.add_decl_stmt(stmt);
            }
        }

        if !self.main_found {
            diagnostics::report_plain(
                Level::Error,
                "'main' symbol not found; did you forget to define 'main'?",
            );
            return (
                SymbolTable {
                    structs: self.structs,
                    funcs: self.funcs,
                },
                true,
            );
        }

        for file in program.files.iter_mut() {
            for stmt in file.stmts.iter_mut() {
                self.check_stmt(stmt);
            }
        }

        self.check_struct_cycles();

        let Self {
            structs,
            funcs,
            error_occurred,
            ..
        } = self;
        (SymbolTable { structs, funcs }, error_occurred)
    }

    // pass 1: collect top-level declarations

    fn add_decl_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Struct(decl) => self.add_struct_decl(decl),
            Stmt::Func(func) => self.add_func_decl(func),
            Stmt::VarDecl(var) => self.declare_variable(&var.decl),
            _ => {}
        }
    }

    fn add_struct_decl(&mut self, decl: &Rc<StructDecl>) {
        if let Some(previous) = self
            .structs
            .iter()
            .find(|s| s.identifier.lexeme == decl.identifier.lexeme)
            .cloned()
        {
            let name = self.interner.resolve(decl.identifier.lexeme).to_owned();
            self.error(
                decl.identifier,
                &format!("redefinition of struct '{name}':"),
            );
            self.note(
                previous.identifier,
                &format!("struct '{name}' previously defined here:"),
            );
            return;
        }
        self.structs.push(decl.clone());
    }

    fn add_func_decl(&mut self, func: &Rc<FuncDecl>) {
        let existing = self
            .funcs
            .iter()
            .position(|f| f.identifier.lexeme == func.identifier.lexeme);

        match existing {
            Some(pos) => {
                let previous = self.funcs[pos].clone();
                let name = self.interner.resolve(func.identifier.lexeme).to_owned();

                if func.is_definition && previous.is_definition {
                    self.error(
                        func.identifier,
                        &format!("redefinition of function '{name}':"),
                    );
                    self.note(
                        previous.identifier,
                        &format!("function '{name}' previously defined here:"),
                    );
                    return;
                }

                // a definition may complete an earlier prototype
                if self.check_signature_match(func, &previous) && func.is_definition {
                    self.funcs[pos] = func.clone();
                }
            }
            None => {
                if func.identifier.lexeme == self.kw.main {
                    self.main_found = true;
                }
                self.funcs.push(func.clone());
            }
        }
    }

    /// Prototypes and definitions of the same function must agree on the
    /// return type, the parameter count and every parameter's type and name.
    fn check_signature_match(&mut self, new: &Rc<FuncDecl>, previous: &Rc<FuncDecl>) -> bool {
        let name = self.interner.resolve(new.identifier.lexeme).to_owned();

        if new.return_type != previous.return_type {
            let msg = format!(
                "conflicting return type '{}' for function '{name}'; previously declared with '{}':",
                new.return_type.display(self.interner),
                previous.return_type.display(self.interner),
            );
            self.error(new.return_type.main, &msg);
            self.note_previous_function(previous, &name);
            return false;
        }

        if new.params.len() != previous.params.len() {
            let msg = format!(
                "conflicting parameter count for function '{name}'; expected {} parameter(s), but got {} parameter(s):",
                previous.params.len(),
                new.params.len(),
            );
            self.error(new.identifier, &msg);
            self.note_previous_function(previous, &name);
            return false;
        }

        for (new_param, old_param) in new.params.iter().zip(previous.params.iter()) {
            let (Some(new_type), Some(old_type)) = (&new_param.data_type, &old_param.data_type)
            else {
                continue;
            };

            if new_type != old_type {
                let msg = format!(
                    "conflicting type '{}' for parameter '{}' of function '{name}':",
                    new_type.display(self.interner),
                    self.interner.resolve(new_param.identifier.lexeme),
                );
                self.error(new_type.main, &msg);
                self.note_previous_function(previous, &name);
                return false;
            }

            if new_param.identifier.lexeme != old_param.identifier.lexeme {
                let msg = format!(
                    "conflicting name '{}' for parameter of function '{name}'; previously declared as '{}':",
                    self.interner.resolve(new_param.identifier.lexeme),
                    self.interner.resolve(old_param.identifier.lexeme),
                );
                self.error(new_param.identifier, &msg);
                self.note_previous_function(previous, &name);
                return false;
            }
        }

        true
    }

    fn note_previous_function(&mut self, previous: &Rc<FuncDecl>, name: &str) {
        self.note(
            previous.identifier,
            &format!("function '{name}' previously declared here:"),
        );
    }

    // pass 2: resolve uses

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Struct(decl) => {
                let decl = decl.clone();
                self.check_struct(&decl);
            }
            Stmt::Func(func) => {
                let func = func.clone();
                self.check_func(&func);
            }
            Stmt::VarDecl(var) => {
                if var.decl.is_global {
                    self.check_global_var_decl(var);
                } else {
                    self.check_var_decl(var);
                }
            }
            Stmt::If(if_stmt) => self.check_if_stmt(if_stmt),
            Stmt::For(for_stmt) => self.check_for_stmt(for_stmt),
            Stmt::While(while_stmt) => self.check_while_stmt(while_stmt),
            Stmt::Return(ret) => self.check_return_stmt(ret),
            Stmt::Expr(expr) => self.check_expr(expr),
        }
    }

    fn check_struct(&mut self, decl: &Rc<StructDecl>) {
        for field in &decl.fields {
            self.check_data_type(&field.data_type, false);
        }
    }

    fn check_func(&mut self, func: &Rc<FuncDecl>) {
        self.check_data_type(&func.return_type, true);

        self.scope.enter_scope();
        for param in &func.params {
            if let Some(data_type) = &param.data_type {
                self.check_data_type(data_type, false);
            }
            self.declare_variable(param);
        }
        for stmt in func.body.borrow_mut().iter_mut() {
            self.check_stmt(stmt);
        }
        self.scope.exit_scope();
    }

    fn check_global_var_decl(&mut self, var: &mut VarDeclStmt) {
        if let Some(data_type) = &var.decl.data_type {
            self.check_data_type(data_type, false);
        }
        if let Some(initializer) = &mut var.initializer {
            self.check_expr(initializer);
        }
    }

    fn check_var_decl(&mut self, var: &mut VarDeclStmt) {
        if let Some(data_type) = &var.decl.data_type {
            self.check_data_type(data_type, false);
        }
        if let Some(initializer) = &mut var.initializer {
            self.check_expr(initializer);
        }

        // the variable only comes into scope after its own initializer
        self.declare_variable(&var.decl);
    }

    fn check_if_stmt(&mut self, if_stmt: &mut IfStmt) {
        self.check_if_branch(&mut if_stmt.if_branch);
        for branch in if_stmt.elif_branches.iter_mut() {
            self.check_if_branch(branch);
        }
        if let Some(branch) = &mut if_stmt.else_branch {
            self.check_if_branch(branch);
        }
    }

    fn check_if_branch(&mut self, branch: &mut IfBranch) {
        if let Some(cond) = &mut branch.cond {
            self.check_expr(cond);
        }

        self.scope.enter_scope();
        for stmt in branch.body.iter_mut() {
            self.check_stmt(stmt);
        }
        self.scope.exit_scope();
    }

    fn check_for_stmt(&mut self, for_stmt: &mut ForStmt) {
        self.scope.enter_scope();
        self.declare_variable(&for_stmt.counter);
        self.check_expr(&mut for_stmt.to);
        for stmt in for_stmt.body.iter_mut() {
            self.check_stmt(stmt);
        }
        self.scope.exit_scope();
    }

    fn check_while_stmt(&mut self, while_stmt: &mut WhileStmt) {
        self.check_expr(&mut while_stmt.cond);

        self.scope.enter_scope();
        for stmt in while_stmt.body.iter_mut() {
            self.check_stmt(stmt);
        }
        self.scope.exit_scope();
    }

    fn check_return_stmt(&mut self, ret: &mut ReturnStmt) {
        if let Some(expr) = &mut ret.expr {
            self.check_expr(expr);
        }
    }

    fn check_expr(&mut self, expr: &mut Expr) {
        let head = expr.head;
        match &mut expr.kind {
            ExprKind::FuncCall(call) => self.check_func_call(head, call),
            ExprKind::Variable(var) => self.check_variable_expr(var),
            ExprKind::DotAccess(dot) => self.check_expr(&mut dot.left),
            ExprKind::Number(_)
            | ExprKind::Char(_)
            | ExprKind::Str(_)
            | ExprKind::Null(_)
            | ExprKind::Bool(_) => {}
        }
    }

    fn check_func_call(&mut self, head: Token, call: &mut FuncCallExpr) {
        if call.callee.kind == TokenKind::Identifier {
            let found = self
                .funcs
                .iter()
                .find(|f| f.identifier.lexeme == call.callee.lexeme)
                .cloned();

            let Some(func) = found else {
                let name = self.interner.resolve(call.callee.lexeme).to_owned();
                self.error(
                    call.callee,
                    &format!(
                        "implicit declaration of function '{name}'; did you forget to define '{name}'?"
                    ),
                );
                return;
            };

            let expected = func.params.len();
            let got = call.args.len();
            if got != expected {
                let anchor = if got > expected {
                    call.args[expected].head
                } else {
                    head
                };
                self.error(
                    anchor,
                    &format!(
                        "conflicting argument-length in function call; \
                         expected {expected} argument(s), but got {got} argument(s);"
                    ),
                );
                let name = self.interner.resolve(func.identifier.lexeme).to_owned();
                self.note(func.identifier, &format!("callee '{name}' defined here:"));
                return;
            }

            for arg in call.args.iter_mut() {
                self.check_expr(arg);
            }
            call.callee_decl = Some(func);
        } else if call.callee.kind == TokenKind::Keyword {
            let sym = call.callee.lexeme;
            let arity_ok = if sym == self.kw.set || sym == self.kw.at {
                self.check_builtin_arity(head, call, 2)
            } else if sym == self.kw.deref || sym == self.kw.addr {
                self.check_builtin_arity(head, call, 1)
            } else {
                true
            };
            if !arity_ok {
                return;
            }

            for arg in call.args.iter_mut() {
                self.check_expr(arg);
            }
        } else {
            match call.callee.kind {
                TokenKind::Equal
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual => {
                    if !self.check_comparison_arity(head, call) {
                        return;
                    }
                }
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent => {
                    if call.args.len() < 2 {
                        let op = self.interner.resolve(call.callee.lexeme).to_owned();
                        self.error(
                            head,
                            &format!(
                                "'{op}' operator needs at least 2 arguments, but got {} argument(s);",
                                call.args.len()
                            ),
                        );
                        return;
                    }
                }
                _ => {}
            }

            for arg in call.args.iter_mut() {
                self.check_expr(arg);
            }
        }
    }

    fn check_builtin_arity(&mut self, head: Token, call: &FuncCallExpr, expected: usize) -> bool {
        let got = call.args.len();
        if got == expected {
            return true;
        }

        let anchor = if got > expected {
            call.args[expected].head
        } else {
            head
        };
        let name = self.interner.resolve(call.callee.lexeme).to_owned();
        let plural = if expected == 1 {
            "1 argument"
        } else {
            "2 arguments"
        };
        self.error(
            anchor,
            &format!(
                "built-in function '{name}' only accepts {plural}, but got {got} argument(s);"
            ),
        );
        false
    }

    fn check_comparison_arity(&mut self, head: Token, call: &FuncCallExpr) -> bool {
        let got = call.args.len();
        if got == 2 {
            return true;
        }

        let anchor = if got > 2 { call.args[2].head } else { head };
        let op = self.interner.resolve(call.callee.lexeme).to_owned();
        self.error(
            anchor,
            &format!("'{op}' operator only accepts 2 arguments, but got {got} argument(s);"),
        );
        false
    }

    fn check_variable_expr(&mut self, var: &mut VariableExpr) {
        match self.scope.find_variable(var.identifier.lexeme) {
            Some(decl) => var.decl = Some(decl),
            None => {
                let name = self.interner.resolve(var.identifier.lexeme).to_owned();
                self.error(
                    var.identifier,
                    &format!("undeclared variable '{name}'; did you forget to declare '{name}'?"),
                );
            }
        }
    }

    /// Bind identifier-named types to the struct table; reject `void` where
    /// it cannot stand (only a function return type may be plain `void`).
    fn check_data_type(&mut self, data_type: &DataType, void_allowed: bool) {
        if data_type.main.kind == TokenKind::Identifier {
            let found = self
                .structs
                .iter()
                .position(|s| s.identifier.lexeme == data_type.main.lexeme);
            match found {
                Some(idx) => data_type.resolved_struct.set(Some(StructId(idx as u32))),
                None => {
                    let name = self.interner.resolve(data_type.main.lexeme).to_owned();
                    self.error(
                        data_type.main,
                        &format!(
                            "undefined type name '{name}'; did you forget to define type '{name}'"
                        ),
                    );
                }
            }
        } else if data_type.main.lexeme == self.kw.void
            && data_type.pointer_count == 0
            && !void_allowed
        {
            self.error(
                data_type.main,
                "cannot use type 'void' here; did you mean 'void*'?",
            );
        }
    }

    /// Insert a declaration into the current scope, rejecting shadowing of
    /// any enclosing scope's binding.
    fn declare_variable(&mut self, decl: &Rc<VarDecl>) {
        if let Some(previous) = self.scope.find_variable(decl.identifier.lexeme) {
            let name = self.interner.resolve(decl.identifier.lexeme).to_owned();
            self.error(
                decl.identifier,
                &format!("redeclaration of variable '{name}':"),
            );
            self.note(
                previous.identifier,
                &format!("variable '{name}' previously declared here:"),
            );
            return;
        }
        self.scope.add_variable(decl.identifier.lexeme, decl.clone());
    }

    /// A struct that contains itself by value (directly or through other
    /// structs) cannot be laid out.
    fn check_struct_cycles(&mut self) {
        for idx in 0..self.structs.len() {
            let mut visited = vec![false; self.structs.len()];
            if self.struct_reaches(idx, idx, &mut visited) {
                let decl = self.structs[idx].clone();
                let name = self.interner.resolve(decl.identifier.lexeme).to_owned();
                self.error(
                    decl.identifier,
                    &format!("struct '{name}' contains itself by value; use a pointer"),
                );
            }
        }
    }

    fn struct_reaches(&self, from: usize, target: usize, visited: &mut [bool]) -> bool {
        for field in &self.structs[from].fields {
            if field.data_type.pointer_count != 0 {
                continue;
            }
            let Some(StructId(next)) = field.data_type.resolved_struct.get() else {
                continue;
            };
            let next = next as usize;
            if next == target {
                return true;
            }
            if !visited[next] {
                visited[next] = true;
                if self.struct_reaches(next, target, visited) {
                    return true;
                }
            }
        }
        false
    }

    fn error(&mut self, token: Token, msg: &str) {
        diagnostics::report(self.sources, &token, Level::Error, msg);
        self.error_occurred = true;
        self.error_count += 1;
    }

    fn note(&mut self, token: Token, msg: &str) {
        diagnostics::report(self.sources, &token, Level::Note, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParsedFile;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn link_source(input: &str) -> (Program, SymbolTable, bool) {
        let mut sources = SourceMap::new();
        let id = sources.add("test.eth".into(), input.into());
        let mut interner = Interner::new();
        let kw = Keywords::new(&mut interner);
        let (tokens, lex_error) = Lexer::new(sources.file(id), id, &mut interner).lex();
        assert!(!lex_error);
        let output = Parser::new(&tokens, sources.file(id), &interner, &kw).parse();
        assert!(!output.error_occurred);

        let mut program = Program {
            files: vec![ParsedFile {
                source: id,
                stmts: output.stmts,
            }],
        };
        let (table, error) = Linker::new(&sources, &interner, &kw).run(&mut program);
        (program, table, error)
    }

    #[test]
    fn test_minimal_main_links() {
        let (_, table, error) = link_source("[defn int:main [void] [return 0]]");

        assert!(!error);
        assert_eq!(table.funcs.len(), 1);
    }

    #[test]
    fn test_missing_main_is_an_error() {
        let (_, _, error) = link_source("[defn int:helper [void] [return 0]]");

        assert!(error);
    }

    #[test]
    fn test_variable_use_is_resolved_to_its_declaration() {
        let (program, _, error) =
            link_source("[defn int:main [int:x] [return x]]");

        assert!(!error);
        let Stmt::Func(func) = &program.files[0].stmts[0] else {
            panic!("expected a function");
        };
        let body = func.body.borrow();
        let Stmt::Return(ret) = &body[0] else {
            panic!("expected a return");
        };
        let ExprKind::Variable(var) = &ret.expr.as_ref().unwrap().kind else {
            panic!("expected a variable use");
        };
        assert!(Rc::ptr_eq(var.decl.as_ref().unwrap(), &func.params[0]));
    }

    #[test]
    fn test_undeclared_variable_is_an_error() {
        let (_, _, error) = link_source("[defn int:main [void] [return x]]");

        assert!(error);
    }

    #[test]
    fn test_shadowing_is_an_error() {
        let (_, _, error) = link_source(
            "[defn int:main [int:x] [if [= x 0] [let int:x 1]] [return x]]",
        );

        assert!(error);
    }

    #[test]
    fn test_sibling_scopes_may_reuse_names() {
        let (_, _, error) = link_source(
            "[defn int:main [void] [if [= 1 1] [let int:x 1]] [if [= 2 2] [let int:x 2]] [return 0]]",
        );

        assert!(!error);
    }

    #[test]
    fn test_call_is_resolved_and_arity_checked() {
        let (program, _, error) =
            link_source("[defn int:f [int:x] [return x]] [defn int:main [void] [return [f 1]]]");

        assert!(!error);
        let Stmt::Func(main) = &program.files[0].stmts[1] else {
            panic!("expected a function");
        };
        let body = main.body.borrow();
        let Stmt::Return(ret) = &body[0] else {
            panic!("expected a return");
        };
        let ExprKind::FuncCall(call) = &ret.expr.as_ref().unwrap().kind else {
            panic!("expected a call");
        };
        assert!(call.callee_decl.is_some());
    }

    #[test]
    fn test_argument_count_mismatch_is_an_error() {
        let (_, _, error) =
            link_source("[defn int:f [int:x] [return x]] [defn int:main [void] [return [f 1 2]]]");

        assert!(error);
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let (_, _, error) = link_source("[defn int:main [void] [return [f 1]]]");

        assert!(error);
    }

    #[test]
    fn test_set_arity_is_checked() {
        let (_, _, error) =
            link_source("[defn int:main [void] [let int:x 0] [set x 1 2] [return x]]");

        assert!(error);
    }

    #[test]
    fn test_deref_arity_is_checked() {
        let (_, _, error) =
            link_source("[defn int:main [int*:p] [return [deref p p]]]");

        assert!(error);
    }

    #[test]
    fn test_arithmetic_needs_two_arguments() {
        let (_, _, error) = link_source("[defn int:main [void] [return [+ 1]]]");

        assert!(error);
    }

    #[test]
    fn test_struct_types_are_bound() {
        let (program, _, error) = link_source(
            "[struct Point [let int:x]] [defn int:main [void] [let Point:p] [return 0]]",
        );

        assert!(!error);
        let Stmt::Func(main) = &program.files[0].stmts[1] else {
            panic!("expected a function");
        };
        let body = main.body.borrow();
        let Stmt::VarDecl(var) = &body[0] else {
            panic!("expected a var decl");
        };
        assert_eq!(
            var.decl.data_type.as_ref().unwrap().resolved_struct.get(),
            Some(StructId(0))
        );
    }

    #[test]
    fn test_unknown_type_name_is_an_error() {
        let (_, _, error) = link_source("[defn int:main [void] [let Point:p] [return 0]]");

        assert!(error);
    }

    #[test]
    fn test_void_variable_is_rejected() {
        let (_, _, error) = link_source("[defn int:main [void] [let void:x] [return 0]]");

        assert!(error);
    }

    #[test]
    fn test_struct_redefinition_is_an_error() {
        let (_, _, error) = link_source(
            "[struct P [let int:x]] [struct P [let int:y]] [defn int:main [void] [return 0]]",
        );

        assert!(error);
    }

    #[test]
    fn test_prototype_then_definition_links() {
        let (_, table, error) = link_source(
            "[decl int:f [int:x]] [defn int:f [int:x] [return x]] \
             [defn int:main [void] [return [f 1]]]",
        );

        assert!(!error);
        // the definition replaced the prototype in the table
        let f = table
            .funcs
            .iter()
            .find(|f| f.params.len() == 1)
            .expect("f is in the table");
        assert!(f.is_definition);
    }

    #[test]
    fn test_conflicting_prototype_is_an_error() {
        let (_, _, error) = link_source(
            "[decl int:f [int:x]] [defn int:f [char:x] [return 0]] \
             [defn int:main [void] [return 0]]",
        );

        assert!(error);
    }

    #[test]
    fn test_double_definition_is_an_error() {
        let (_, _, error) = link_source(
            "[defn int:f [void] [return 0]] [defn int:f [void] [return 1]] \
             [defn int:main [void] [return 0]]",
        );

        assert!(error);
    }

    #[test]
    fn test_recursive_struct_through_pointer_links() {
        let (_, _, error) =
            link_source("[struct N [let N*:next]] [defn int:main [void] [return 0]]");

        assert!(!error);
    }

    #[test]
    fn test_struct_containing_itself_by_value_is_rejected() {
        let (_, _, error) =
            link_source("[struct N [let N:inner]] [defn int:main [void] [return 0]]");

        assert!(error);
    }
}

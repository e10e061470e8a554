//! Typechecker for linked programs.
//!
//! Computes a type for every expression, applies the implicit-cast rules and
//! reports type errors. The linker must have run first: variable uses,
//! callees and struct-typed data types are expected to be resolved.

use crate::ast::{
    DataType, DotAccessExpr, Expr, ExprKind, ForStmt, FuncCallExpr, IfStmt, Program, ReturnStmt,
    Stmt, VarDeclStmt, WhileStmt,
};
use crate::diagnostics::{self, Level};
use crate::intern::{Interner, Keywords};
use crate::lexer::{Token, TokenKind};
use crate::linker::SymbolTable;
use crate::source::SourceMap;

/// Relation between two data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeMatch {
    /// Same main type and same pointer depth.
    Match,
    /// Different types the language converts silently, with a warning.
    Implicit,
    No,
}

#[derive(Debug)]
pub struct TypecheckOutput {
    pub error_occurred: bool,
    pub error_count: u32,
    pub warning_count: u32,
}

pub struct Typechecker<'a> {
    sources: &'a SourceMap,
    interner: &'a Interner,
    kw: &'a Keywords,
    table: &'a SymbolTable,
    int_type: DataType,
    char_type: DataType,
    bool_type: DataType,
    string_type: DataType,
    null_type: DataType,
    /// Set by any error, reset at each statement boundary. Lets a statement
    /// whose prerequisites failed drop out without cascading.
    error_occurred: bool,
    /// Latched across statements; decides the stage verdict.
    persistent_error_occurred: bool,
    error_count: u32,
    warning_count: u32,
}

impl<'a> Typechecker<'a> {
    pub fn new(
        sources: &'a SourceMap,
        interner: &'a Interner,
        kw: &'a Keywords,
        table: &'a SymbolTable,
    ) -> Self {
        Self {
            sources,
            interner,
            kw,
            table,
            int_type: DataType::synthetic(kw.int, 0),
            char_type: DataType::synthetic(kw.char_, 0),
            bool_type: DataType::synthetic(kw.bool_, 0),
            string_type: DataType::synthetic(kw.char_, 1),
            null_type: DataType::synthetic(kw.void, 1),
            error_occurred: false,
            persistent_error_occurred: false,
            error_count: 0,
            warning_count: 0,
        }
    }

    pub fn run(mut self, program: &mut Program) -> TypecheckOutput {
        for file in program.files.iter_mut() {
            for stmt in file.stmts.iter_mut() {
                self.resolve_stmt(stmt);
            }
        }

        TypecheckOutput {
            error_occurred: self.persistent_error_occurred,
            error_count: self.error_count,
            warning_count: self.warning_count,
        }
    }

    fn resolve_stmt(&mut self, stmt: &mut Stmt) {
        self.error_occurred = false;

        match stmt {
            Stmt::Func(func) => {
                let func = func.clone();
                for stmt in func.body.borrow_mut().iter_mut() {
                    self.resolve_stmt(stmt);
                }
            }
            Stmt::VarDecl(var) => self.resolve_var_decl(var),
            Stmt::If(if_stmt) => self.resolve_if_stmt(if_stmt),
            Stmt::For(for_stmt) => self.resolve_for_stmt(for_stmt),
            Stmt::While(while_stmt) => self.resolve_while_stmt(while_stmt),
            Stmt::Return(ret) => self.resolve_return_stmt(ret),
            Stmt::Expr(expr) => {
                self.resolve_expr(expr);
            }
            Stmt::Struct(_) => {}
        }

        if self.error_occurred {
            self.persistent_error_occurred = true;
        }
    }

    fn resolve_var_decl(&mut self, var: &mut VarDeclStmt) {
        let Some(initializer) = &mut var.initializer else {
            return;
        };
        let Some(declared) = var.decl.data_type.clone() else {
            return;
        };
        let Some(init_type) = self.resolve_expr(initializer) else {
            return;
        };

        match self.type_match(&init_type, &declared) {
            TypeMatch::Match => {}
            TypeMatch::Implicit => self.warn_implicit(initializer.head, &init_type, &declared),
            TypeMatch::No => {
                let msg = format!(
                    "cannot initialize variable type '{}' from intializer expression type '{}';",
                    declared.display(self.interner),
                    init_type.display(self.interner),
                );
                self.error(initializer.head, &msg);
            }
        }
    }

    fn resolve_if_stmt(&mut self, if_stmt: &mut IfStmt) {
        if let Some(cond) = &mut if_stmt.if_branch.cond {
            self.check_condition(cond);
        }
        for stmt in if_stmt.if_branch.body.iter_mut() {
            self.resolve_stmt(stmt);
        }

        for branch in if_stmt.elif_branches.iter_mut() {
            if let Some(cond) = &mut branch.cond {
                self.check_condition(cond);
            }
            for stmt in branch.body.iter_mut() {
                self.resolve_stmt(stmt);
            }
        }

        if let Some(branch) = &mut if_stmt.else_branch {
            for stmt in branch.body.iter_mut() {
                self.resolve_stmt(stmt);
            }
        }
    }

    fn resolve_for_stmt(&mut self, for_stmt: &mut ForStmt) {
        if let Some(to_type) = self.resolve_expr(&mut for_stmt.to) {
            let int_type = self.int_type.clone();
            match self.type_match(&to_type, &int_type) {
                TypeMatch::Match => {}
                TypeMatch::Implicit => {
                    self.warn_implicit(for_stmt.to.head, &to_type, &int_type)
                }
                TypeMatch::No => {
                    let msg = format!(
                        "'to' bound must be type 'int', but got '{}';",
                        to_type.display(self.interner),
                    );
                    self.error(for_stmt.to.head, &msg);
                }
            }
        }

        for stmt in for_stmt.body.iter_mut() {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_while_stmt(&mut self, while_stmt: &mut WhileStmt) {
        self.check_condition(&mut while_stmt.cond);
        for stmt in while_stmt.body.iter_mut() {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_return_stmt(&mut self, ret: &mut ReturnStmt) {
        match &mut ret.expr {
            Some(expr) => {
                let Some(expr_type) = self.resolve_expr(expr) else {
                    return;
                };
                match self.type_match(&expr_type, &ret.return_type) {
                    TypeMatch::Match => {}
                    TypeMatch::Implicit => {
                        self.warn_implicit(expr.head, &expr_type, &ret.return_type)
                    }
                    TypeMatch::No => {
                        let msg = format!(
                            "cannot return expression of type '{}' from function '{}' returning '{}';",
                            expr_type.display(self.interner),
                            self.interner.resolve(ret.function_identifier.lexeme),
                            ret.return_type.display(self.interner),
                        );
                        self.error(expr.head, &msg);
                    }
                }
            }
            None => {
                let returns_void = ret.return_type.pointer_count == 0
                    && ret.return_type.main.lexeme == self.kw.void;
                if !returns_void {
                    let msg = format!(
                        "function '{}' expects a return value of type '{}';",
                        self.interner.resolve(ret.function_identifier.lexeme),
                        ret.return_type.display(self.interner),
                    );
                    self.error(ret.keyword, &msg);
                }
            }
        }
    }

    fn check_condition(&mut self, cond: &mut Expr) {
        let Some(cond_type) = self.resolve_expr(cond) else {
            return;
        };
        let bool_type = self.bool_type.clone();
        match self.type_match(&cond_type, &bool_type) {
            TypeMatch::Match => {}
            TypeMatch::Implicit => self.warn_implicit(cond.head, &cond_type, &bool_type),
            TypeMatch::No => {
                let msg = format!(
                    "cannot convert condition type '{}' to 'bool';",
                    cond_type.display(self.interner),
                );
                self.error(cond.head, &msg);
            }
        }
    }

    fn resolve_expr(&mut self, expr: &mut Expr) -> Option<DataType> {
        let head = expr.head;
        match &mut expr.kind {
            ExprKind::Number(_) => Some(self.int_type.clone()),
            ExprKind::Char(_) => Some(self.char_type.clone()),
            ExprKind::Str(_) => Some(self.string_type.clone()),
            ExprKind::Null(_) => Some(self.null_type.clone()),
            ExprKind::Bool(_) => Some(self.bool_type.clone()),
            ExprKind::Variable(var) => {
                let decl = var.decl.as_ref()?;
                match &decl.data_type {
                    Some(data_type) => Some(data_type.clone()),
                    // a synthesized `for` counter counts as int
                    None => Some(self.int_type.clone()),
                }
            }
            ExprKind::FuncCall(call) => self.resolve_func_call(head, call),
            ExprKind::DotAccess(dot) => self.resolve_dot_access(dot),
        }
    }

    fn resolve_func_call(&mut self, head: Token, call: &mut FuncCallExpr) -> Option<DataType> {
        if call.callee.kind == TokenKind::Identifier {
            let func = call.callee_decl.clone()?;

            for (arg, param) in call.args.iter_mut().zip(func.params.iter()) {
                let Some(arg_type) = self.resolve_expr(arg) else {
                    continue;
                };
                let Some(param_type) = &param.data_type else {
                    continue;
                };
                match self.type_match(&arg_type, param_type) {
                    TypeMatch::Match => {}
                    TypeMatch::Implicit => self.warn_implicit(arg.head, &arg_type, param_type),
                    TypeMatch::No => {
                        let msg = format!(
                            "cannot pass argument of type '{}' to parameter of type '{}';",
                            arg_type.display(self.interner),
                            param_type.display(self.interner),
                        );
                        self.error(arg.head, &msg);
                        let note = format!(
                            "parameter '{}' declared here:",
                            self.interner.resolve(param.identifier.lexeme),
                        );
                        self.note(param.identifier, &note);
                    }
                }
            }

            return Some(func.return_type.clone());
        }

        if call.callee.kind == TokenKind::Keyword {
            let sym = call.callee.lexeme;
            if sym == self.kw.set {
                return self.resolve_set(call);
            }
            if sym == self.kw.deref {
                return self.resolve_deref(call);
            }
            if sym == self.kw.addr {
                return self.resolve_addr(call);
            }
            if sym == self.kw.at {
                return self.resolve_at(call);
            }
            return None;
        }

        match call.callee.kind {
            TokenKind::Equal
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => self.resolve_comparison(head, call),
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent => self.resolve_arithmetic(call),
            _ => None,
        }
    }

    fn resolve_set(&mut self, call: &mut FuncCallExpr) -> Option<DataType> {
        let [lhs, rhs] = &mut call.args[..] else {
            return None;
        };
        let lhs_type = self.resolve_expr(lhs)?;
        let rhs_type = self.resolve_expr(rhs)?;

        match self.type_match(&rhs_type, &lhs_type) {
            TypeMatch::Match => {}
            TypeMatch::Implicit => self.warn_implicit(rhs.head, &rhs_type, &lhs_type),
            TypeMatch::No => {
                let msg = format!(
                    "cannot set variable type '{}' to expression type '{}'",
                    lhs_type.display(self.interner),
                    rhs_type.display(self.interner),
                );
                self.error(rhs.head, &msg);
            }
        }

        Some(lhs_type)
    }

    fn resolve_deref(&mut self, call: &mut FuncCallExpr) -> Option<DataType> {
        let [operand] = &mut call.args[..] else {
            return None;
        };
        let operand_type = self.resolve_expr(operand)?;

        if operand_type.pointer_count == 0 {
            let msg = format!(
                "cannot dereference non-pointer type '{}';",
                operand_type.display(self.interner),
            );
            self.error(operand.head, &msg);
            return None;
        }
        if operand_type.pointer_count == 1 && operand_type.main.lexeme == self.kw.void {
            self.error(operand.head, "cannot dereference a 'void*' pointer;");
            return None;
        }

        Some(operand_type.pointee())
    }

    fn resolve_addr(&mut self, call: &mut FuncCallExpr) -> Option<DataType> {
        let [operand] = &mut call.args[..] else {
            return None;
        };
        let operand_type = self.resolve_expr(operand)?;
        Some(operand_type.pointer_to())
    }

    fn resolve_at(&mut self, call: &mut FuncCallExpr) -> Option<DataType> {
        let [pointer, index] = &mut call.args[..] else {
            return None;
        };
        let pointer_type = self.resolve_expr(pointer)?;

        if pointer_type.pointer_count == 0 {
            let msg = format!(
                "cannot index non-pointer type '{}';",
                pointer_type.display(self.interner),
            );
            self.error(pointer.head, &msg);
            return None;
        }
        if pointer_type.pointer_count == 1 && pointer_type.main.lexeme == self.kw.void {
            self.error(pointer.head, "cannot index a 'void*' pointer;");
            return None;
        }

        if let Some(index_type) = self.resolve_expr(index) {
            let int_type = self.int_type.clone();
            match self.type_match(&index_type, &int_type) {
                TypeMatch::Match => {}
                TypeMatch::Implicit => self.warn_implicit(index.head, &index_type, &int_type),
                TypeMatch::No => {
                    let msg = format!(
                        "index of 'at' must be type 'int', but got '{}';",
                        index_type.display(self.interner),
                    );
                    self.error(index.head, &msg);
                }
            }
        }

        Some(pointer_type.pointee())
    }

    fn resolve_arithmetic(&mut self, call: &mut FuncCallExpr) -> Option<DataType> {
        let op = self.interner.resolve(call.callee.lexeme).to_owned();
        let int_type = self.int_type.clone();

        for arg in call.args.iter_mut() {
            let Some(arg_type) = self.resolve_expr(arg) else {
                continue;
            };
            match self.type_match(&arg_type, &int_type) {
                TypeMatch::Match => {}
                TypeMatch::Implicit => self.warn_implicit(arg.head, &arg_type, &int_type),
                TypeMatch::No => {
                    let msg = format!(
                        "'{op}' operator expects 'int' arguments, but got '{}';",
                        arg_type.display(self.interner),
                    );
                    self.error(arg.head, &msg);
                }
            }
        }

        Some(int_type)
    }

    fn resolve_comparison(&mut self, head: Token, call: &mut FuncCallExpr) -> Option<DataType> {
        let [left, right] = &mut call.args[..] else {
            return None;
        };
        let left_head = left.head;
        let right_head = right.head;
        let left_type = self.resolve_expr(left)?;
        let right_type = self.resolve_expr(right)?;

        match self.type_match(&left_type, &right_type) {
            TypeMatch::Match => {}
            TypeMatch::Implicit => {
                // the smaller operand is the one that gets promoted
                let (anchor, source, target) =
                    if self.type_size(&right_type) < self.type_size(&left_type) {
                        (right_head, &right_type, &left_type)
                    } else {
                        (left_head, &left_type, &right_type)
                    };
                self.warn_implicit(anchor, source, target);
            }
            TypeMatch::No => {
                let msg = format!(
                    "cannot compare type '{}' with type '{}';",
                    left_type.display(self.interner),
                    right_type.display(self.interner),
                );
                self.error(head, &msg);
            }
        }

        Some(self.bool_type.clone())
    }

    fn resolve_dot_access(&mut self, dot: &mut DotAccessExpr) -> Option<DataType> {
        let left_type = self.resolve_expr(&mut dot.left)?;
        let field_name = self.interner.resolve(dot.right.lexeme).to_owned();

        if left_type.main.kind != TokenKind::Identifier || left_type.pointer_count > 1 {
            let msg = format!(
                "cannot access field '{field_name}' of type '{}'; use 'deref' operator instead",
                left_type.display(self.interner),
            );
            self.error(dot.right, &msg);
            return None;
        }

        dot.is_left_pointer = left_type.pointer_count == 1;

        let struct_id = left_type.resolved_struct.get()?;
        let strukt = self.table.structs.get(struct_id.0 as usize)?.clone();

        match strukt
            .fields
            .iter()
            .find(|f| f.identifier.lexeme == dot.right.lexeme)
        {
            Some(field) => Some(field.data_type.clone()),
            None => {
                let struct_name = self.interner.resolve(strukt.identifier.lexeme).to_owned();
                self.error(
                    dot.right,
                    &format!("struct '{struct_name}' has no field named '{field_name}';"),
                );
                self.note(
                    strukt.identifier,
                    &format!("struct '{struct_name}' defined here:"),
                );
                None
            }
        }
    }

    fn type_match(&self, a: &DataType, b: &DataType) -> TypeMatch {
        if a.pointer_count != b.pointer_count {
            return TypeMatch::No;
        }
        if a.main.lexeme == b.main.lexeme {
            return TypeMatch::Match;
        }
        // any pointer converts to any other pointer, with a warning
        if a.pointer_count > 0 {
            return TypeMatch::Implicit;
        }

        let scalar =
            |t: &DataType| [self.kw.int, self.kw.char_, self.kw.bool_].contains(&t.main.lexeme);
        if scalar(a) && scalar(b) {
            TypeMatch::Implicit
        } else {
            TypeMatch::No
        }
    }

    /// Byte width used only to pick the smaller operand of a comparison
    /// warning.
    fn type_size(&self, data_type: &DataType) -> u32 {
        if data_type.pointer_count > 0 {
            return 8;
        }
        if data_type.main.kind == TokenKind::Identifier {
            // TODO: compute struct sizes from field layout
            return 16;
        }

        let sym = data_type.main.lexeme;
        if sym == self.kw.char_ || sym == self.kw.bool_ || sym == self.kw.i8_ || sym == self.kw.u8_
        {
            1
        } else if sym == self.kw.i16_ || sym == self.kw.u16_ {
            2
        } else if sym == self.kw.int || sym == self.kw.i32_ || sym == self.kw.u32_ {
            4
        } else {
            8
        }
    }

    fn warn_implicit(&mut self, anchor: Token, source: &DataType, target: &DataType) {
        let msg = format!(
            "implicit cast from '{}' to '{}':",
            source.display(self.interner),
            target.display(self.interner),
        );
        self.warning(anchor, &msg);
    }

    fn error(&mut self, token: Token, msg: &str) {
        diagnostics::report(self.sources, &token, Level::Error, msg);
        self.error_occurred = true;
        self.error_count += 1;
    }

    fn note(&mut self, token: Token, msg: &str) {
        diagnostics::report(self.sources, &token, Level::Note, msg);
    }

    fn warning(&mut self, token: Token, msg: &str) {
        diagnostics::report(self.sources, &token, Level::Warning, msg);
        self.warning_count += 1;
    }
}

//! C back-end.
//!
//! Walks the resolved AST once and appends C text to an output buffer; no
//! intermediate representation. The emitted translation unit is printed to
//! stdout and then piped to the platform C compiler, which produces the
//! object file.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use log::{error, info};

use crate::ast::{
    DataType, Expr, ExprKind, Field, ForStmt, FuncCallExpr, FuncDecl, IfStmt, ParsedFile, Program,
    Stmt, StructDecl, VarDeclStmt, WhileStmt,
};
use crate::intern::{Interner, Keywords};
use crate::lexer::{Token, TokenKind};
use crate::linker::SymbolTable;
use crate::TAB_SIZE;

pub struct Compiler<'a> {
    interner: &'a Interner,
    kw: &'a Keywords,
    table: &'a SymbolTable,
    output: String,
    tab_count: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(interner: &'a Interner, kw: &'a Keywords, table: &'a SymbolTable) -> Self {
        Self {
            interner,
            kw,
            table,
            output: String::new(),
            tab_count: 0,
        }
    }

    /// Emit the whole translation unit. Pure function of the AST, the
    /// interner and the symbol table.
    pub fn emit(mut self, program: &Program) -> String {
        self.gen_prelude();
        self.gen_struct_decls();
        self.gen_structs();
        self.gen_global_var_decls(program);
        self.gen_function_prototypes();

        for file in &program.files {
            self.gen_file(file);
        }

        self.output
    }

    fn gen_prelude(&mut self) {
        self.output.push_str("#include <stdint.h>\n\n");

        self.output.push_str("#define null (void*)0\n");
        self.output.push_str("#define true 1\n");
        self.output.push_str("#define false 0\n\n");

        self.output.push_str("typedef int8_t i8;\n");
        self.output.push_str("typedef int16_t i16;\n");
        self.output.push_str("typedef int32_t i32;\n");
        self.output.push_str("typedef int64_t i64;\n");
        self.output.push_str("typedef uint8_t u8;\n");
        self.output.push_str("typedef uint16_t u16;\n");
        self.output.push_str("typedef uint32_t u32;\n");
        self.output.push_str("typedef uint64_t u64;\n");
        self.output.push_str("typedef _Bool bool;\n\n");
    }

    fn gen_struct_decls(&mut self) {
        for decl in &self.table.structs {
            self.output.push_str("typedef struct ");
            self.push_token(decl.identifier);
            self.output.push(' ');
            self.push_token(decl.identifier);
            self.output.push_str(";\n");
        }
        self.output.push('\n');
    }

    fn gen_structs(&mut self) {
        for decl in self.table.structs.clone() {
            self.gen_struct(&decl);
        }
    }

    fn gen_struct(&mut self, decl: &StructDecl) {
        self.output.push_str("typedef struct ");
        self.push_token(decl.identifier);
        self.output.push_str(" {\n");

        self.tab_count += 1;
        for field in &decl.fields {
            self.push_tabs();
            self.gen_field(field);
        }
        self.tab_count -= 1;

        self.output.push_str("} ");
        self.push_token(decl.identifier);
        self.output.push_str(";\n\n");
    }

    /// A field whose type is a struct held by value is laid out inline as an
    /// anonymous struct.
    fn gen_field(&mut self, field: &Field) {
        if field.data_type.main.kind == TokenKind::Identifier
            && field.data_type.pointer_count == 0
        {
            if let Some(id) = field.data_type.resolved_struct.get() {
                let referenced = self.table.structs[id.0 as usize].clone();
                self.gen_inline_struct(&referenced);
            }
        } else {
            self.gen_data_type(&field.data_type);
        }
        self.output.push(' ');
        self.push_token(field.identifier);
        self.output.push_str(";\n");
    }

    fn gen_inline_struct(&mut self, decl: &StructDecl) {
        self.output.push_str("struct {\n");

        self.tab_count += 1;
        for field in &decl.fields {
            self.push_tabs();
            self.gen_field(field);
        }
        self.tab_count -= 1;

        self.push_tabs();
        self.output.push('}');
    }

    fn gen_global_var_decls(&mut self, program: &Program) {
        for file in &program.files {
            for stmt in &file.stmts {
                if let Stmt::VarDecl(var) = stmt {
                    self.gen_var_decl(var);
                }
            }
        }
        self.output.push('\n');
    }

    fn gen_function_prototypes(&mut self) {
        for func in self.table.funcs.clone() {
            self.gen_func_signature(&func);
            self.output.push_str(";\n");
        }
        self.output.push('\n');
    }

    fn gen_file(&mut self, file: &ParsedFile) {
        for stmt in &file.stmts {
            if let Stmt::Func(func) = stmt {
                if func.is_definition {
                    self.gen_func(func);
                }
            }
        }
    }

    fn gen_func_signature(&mut self, func: &FuncDecl) {
        self.gen_data_type(&func.return_type);
        self.output.push(' ');
        self.push_token(func.identifier);
        self.output.push('(');
        for (idx, param) in func.params.iter().enumerate() {
            if idx > 0 {
                self.output.push_str(", ");
            }
            if let Some(data_type) = &param.data_type {
                self.gen_data_type(data_type);
                self.output.push(' ');
            }
            self.push_token(param.identifier);
        }
        self.output.push(')');
    }

    fn gen_func(&mut self, func: &FuncDecl) {
        self.gen_func_signature(func);
        self.output.push(' ');
        self.gen_body(&func.body.borrow());
        self.output.push_str("\n\n");
    }

    fn gen_body(&mut self, stmts: &[Stmt]) {
        if stmts.is_empty() {
            self.output.push_str("{ }");
            return;
        }

        self.output.push_str("{\n");
        self.tab_count += 1;
        for stmt in stmts {
            self.gen_stmt(stmt);
        }
        self.tab_count -= 1;
        self.push_tabs();
        self.output.push('}');
    }

    fn gen_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(var) => self.gen_var_decl(var),
            Stmt::If(if_stmt) => self.gen_if_stmt(if_stmt),
            Stmt::For(for_stmt) => self.gen_for_stmt(for_stmt),
            Stmt::While(while_stmt) => self.gen_while_stmt(while_stmt),
            Stmt::Return(ret) => {
                self.push_tabs();
                match &ret.expr {
                    Some(expr) => {
                        self.output.push_str("return (");
                        self.gen_expr(expr);
                        self.output.push_str(");\n");
                    }
                    None => self.output.push_str("return;\n"),
                }
            }
            Stmt::Expr(expr) => {
                self.push_tabs();
                self.gen_expr(expr);
                self.output.push_str(";\n");
            }
            // no nested types or functions
            Stmt::Struct(_) | Stmt::Func(_) => {}
        }
    }

    fn gen_var_decl(&mut self, var: &VarDeclStmt) {
        self.push_tabs();
        match &var.decl.data_type {
            Some(data_type) => self.gen_data_type(data_type),
            None => self.output.push_str("int"),
        }
        self.output.push(' ');
        self.push_token(var.decl.identifier);
        if let Some(initializer) = &var.initializer {
            self.output.push_str(" = ");
            self.gen_expr(initializer);
        }
        self.output.push_str(";\n");
    }

    fn gen_if_stmt(&mut self, if_stmt: &IfStmt) {
        self.push_tabs();
        self.output.push_str("if (");
        if let Some(cond) = &if_stmt.if_branch.cond {
            self.gen_expr(cond);
        }
        self.output.push_str(") ");
        self.gen_body(&if_stmt.if_branch.body);
        self.output.push('\n');

        for branch in &if_stmt.elif_branches {
            self.push_tabs();
            self.output.push_str("else if (");
            if let Some(cond) = &branch.cond {
                self.gen_expr(cond);
            }
            self.output.push_str(") ");
            self.gen_body(&branch.body);
            self.output.push('\n');
        }

        if let Some(branch) = &if_stmt.else_branch {
            self.push_tabs();
            self.output.push_str("else ");
            self.gen_body(&branch.body);
            self.output.push('\n');
        }
    }

    fn gen_for_stmt(&mut self, for_stmt: &ForStmt) {
        self.push_tabs();
        self.output.push_str("for (int ");
        self.push_token(for_stmt.counter.identifier);
        self.output.push_str(" = 0; ");
        self.push_token(for_stmt.counter.identifier);
        self.output.push_str(" < ");
        self.gen_expr(&for_stmt.to);
        self.output.push_str("; ++");
        self.push_token(for_stmt.counter.identifier);
        self.output.push_str(") ");
        self.gen_body(&for_stmt.body);
        self.output.push('\n');
    }

    fn gen_while_stmt(&mut self, while_stmt: &WhileStmt) {
        self.push_tabs();
        self.output.push_str("while (");
        self.gen_expr(&while_stmt.cond);
        self.output.push_str(") ");
        self.gen_body(&while_stmt.body);
        self.output.push('\n');
    }

    fn gen_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Number(token) => self.push_token(*token),
            ExprKind::Char(token) => {
                self.output.push('\'');
                self.push_token(*token);
                self.output.push('\'');
            }
            ExprKind::Str(token) => {
                self.output.push('"');
                self.push_token(*token);
                self.output.push('"');
            }
            ExprKind::Null(_) => self.output.push_str("null"),
            ExprKind::Bool(token) => self.push_token(*token),
            ExprKind::Variable(var) => self.push_token(var.identifier),
            ExprKind::DotAccess(dot) => {
                self.output.push_str("((");
                self.gen_expr(&dot.left);
                if dot.is_left_pointer {
                    self.output.push_str(")->");
                } else {
                    self.output.push_str(").");
                }
                self.push_token(dot.right);
                self.output.push(')');
            }
            ExprKind::FuncCall(call) => self.gen_call(call),
        }
    }

    fn gen_call(&mut self, call: &FuncCallExpr) {
        match call.callee.kind {
            TokenKind::Identifier => {
                self.push_token(call.callee);
                self.output.push('(');
                for (idx, arg) in call.args.iter().enumerate() {
                    if idx > 0 {
                        self.output.push_str(", ");
                    }
                    self.gen_expr(arg);
                }
                self.output.push(')');
            }

            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent => {
                let op = self.interner.resolve(call.callee.lexeme).to_owned();
                self.output.push('(');
                for (idx, arg) in call.args.iter().enumerate() {
                    if idx > 0 {
                        self.output.push(' ');
                        self.output.push_str(&op);
                        self.output.push(' ');
                    }
                    self.gen_expr(arg);
                }
                self.output.push(')');
            }

            TokenKind::Equal
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                let op = if call.callee.kind == TokenKind::Equal {
                    "==".to_owned()
                } else {
                    self.interner.resolve(call.callee.lexeme).to_owned()
                };
                self.output.push('(');
                self.gen_expr(&call.args[0]);
                self.output.push(' ');
                self.output.push_str(&op);
                self.output.push(' ');
                self.gen_expr(&call.args[1]);
                self.output.push(')');
            }

            TokenKind::Keyword => self.gen_operator_keyword_call(call),

            _ => {}
        }
    }

    fn gen_operator_keyword_call(&mut self, call: &FuncCallExpr) {
        let sym = call.callee.lexeme;
        if sym == self.kw.set {
            self.output.push('(');
            self.gen_expr(&call.args[0]);
            self.output.push_str(" = ");
            self.gen_expr(&call.args[1]);
            self.output.push(')');
        } else if sym == self.kw.deref {
            self.output.push_str("(*");
            self.gen_expr(&call.args[0]);
            self.output.push(')');
        } else if sym == self.kw.addr {
            self.output.push_str("(&");
            self.gen_expr(&call.args[0]);
            self.output.push(')');
        } else if sym == self.kw.at {
            self.output.push_str("((");
            self.gen_expr(&call.args[0]);
            self.output.push_str(")[");
            self.gen_expr(&call.args[1]);
            self.output.push_str("])");
        }
    }

    fn gen_data_type(&mut self, data_type: &DataType) {
        self.push_token(data_type.main);
        for _ in 0..data_type.pointer_count {
            self.output.push('*');
        }
    }

    fn push_token(&mut self, token: Token) {
        self.output.push_str(self.interner.resolve(token.lexeme));
    }

    fn push_tabs(&mut self) {
        for _ in 0..self.tab_count {
            for _ in 0..TAB_SIZE {
                self.output.push(' ');
            }
        }
    }
}

/// Feed the emitted translation unit to `gcc` over a pipe and wait for it.
/// The object file lands next to the working directory as `<stem>.o`.
pub fn invoke_c_compiler(code: &str, source_path: &Path) -> std::io::Result<()> {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_owned());
    let object = format!("{stem}.o");

    info!("compiling '{object}'...");

    let mut child = Command::new("gcc")
        .args([
            "-g",
            "-w",
            "-fno-stack-protector",
            "-nostdlib",
            "-c",
            "-o",
            &object,
            "-xc",
            "-",
        ])
        .stdin(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(code.as_bytes())?;
    }

    let status = child.wait()?;
    // TODO: propagate the C compiler's exit status
    if !status.success() {
        error!("C compiler exited with {status}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParsedFile;
    use crate::lexer::Lexer;
    use crate::linker::Linker;
    use crate::parser::Parser;
    use crate::source::SourceMap;
    use crate::typechecker::Typechecker;

    fn emit_source(input: &str) -> String {
        let mut sources = SourceMap::new();
        let id = sources.add("test.eth".into(), input.into());
        let mut interner = Interner::new();
        let kw = Keywords::new(&mut interner);
        let (tokens, lex_error) = Lexer::new(sources.file(id), id, &mut interner).lex();
        assert!(!lex_error);
        let parsed = Parser::new(&tokens, sources.file(id), &interner, &kw).parse();
        assert!(!parsed.error_occurred);

        let mut program = Program {
            files: vec![ParsedFile {
                source: id,
                stmts: parsed.stmts,
            }],
        };
        let (table, link_error) = Linker::new(&sources, &interner, &kw).run(&mut program);
        assert!(!link_error);
        let checked = Typechecker::new(&sources, &interner, &kw, &table).run(&mut program);
        assert!(!checked.error_occurred);

        Compiler::new(&interner, &kw, &table).emit(&program)
    }

    #[test]
    fn test_emit_prelude() {
        let code = emit_source("[defn int:main [void] [return 0]]");

        assert!(code.starts_with("#include <stdint.h>\n"));
        assert!(code.contains("#define null (void*)0\n"));
        assert!(code.contains("typedef int8_t i8;\n"));
        assert!(code.contains("typedef uint64_t u64;\n"));
    }

    #[test]
    fn test_emit_main_skeleton() {
        let code = emit_source("[defn int:main [void] [return 0]]");

        assert!(code.contains("int main();\n"));
        assert!(code.contains("int main() {\n    return (0);\n}\n"));
    }

    #[test]
    fn test_emit_struct_and_dot_access() {
        let code = emit_source(
            "[struct Point [let int:x] [let int:y]] \
             [defn int:main [void]\n  [let Point:p]\n  [set p.x 3]\n  [return p.x]]",
        );

        assert!(code.contains("typedef struct Point Point;\n"));
        assert!(code.contains("typedef struct Point {\n    int x;\n    int y;\n} Point;\n"));
        assert!(code.contains("Point p;\n"));
        assert!(code.contains("(((p).x) = 3);\n"));
        assert!(code.contains("return (((p).x));\n"));
    }

    #[test]
    fn test_emit_dot_access_through_pointer() {
        let code = emit_source(
            "[struct Point [let int:x]] \
             [defn int:f [Point*:p] [return p.x]] \
             [defn int:main [void] [return 0]]",
        );

        assert!(code.contains("int f(Point* p);\n"));
        assert!(code.contains("return (((p)->x));\n"));
    }

    #[test]
    fn test_emit_for_with_empty_body() {
        let code = emit_source("[defn int:main [void] [for i to 10] [return 0]]");

        assert!(code.contains("for (int i = 0; i < 10; ++i) { }\n"));
    }

    #[test]
    fn test_emit_while() {
        let code = emit_source(
            "[defn int:main [void] [let int:x 0] [while [< x 10] [set x [+ x 1]]] [return x]]",
        );

        assert!(code.contains("while ((x < 10)) {\n"));
        assert!(code.contains("(x = (x + 1));\n"));
    }

    #[test]
    fn test_emit_if_elif_else() {
        let code = emit_source(
            "[defn int:main [int:x] \
               [if [= x 0] [return 1]] \
               [elif [< x 0] [return 2]] \
               [else [return 3]]]",
        );

        assert!(code.contains("if ((x == 0)) {\n"));
        assert!(code.contains("else if ((x < 0)) {\n"));
        assert!(code.contains("else {\n"));
    }

    #[test]
    fn test_emit_operator_keywords() {
        let code = emit_source(
            "[defn int:main [int*:p] \
               [let int:x [deref p]] \
               [let int*:q [addr x]] \
               [set x [at p 0]] \
               [return x]]",
        );

        assert!(code.contains("int x = (*p);\n"));
        assert!(code.contains("int* q = (&x);\n"));
        assert!(code.contains("(x = ((p)[0]));\n"));
    }

    #[test]
    fn test_emit_variadic_arithmetic_chain() {
        let code = emit_source("[defn int:main [void] [return [+ 1 2 3 4]]]");

        assert!(code.contains("return ((1 + 2 + 3 + 4));\n"));
    }

    #[test]
    fn test_emit_literals() {
        let code = emit_source(
            "[defn int:main [void] \
               [let char:c 'a'] \
               [let char*:s \"hi\"] \
               [let bool:b true] \
               [return 0]]",
        );

        assert!(code.contains("char c = 'a';\n"));
        assert!(code.contains("char* s = \"hi\";\n"));
        assert!(code.contains("bool b = true;\n"));
    }

    #[test]
    fn test_emit_globals_and_call() {
        let code = emit_source(
            "[let int:g 5] \
             [defn int:f [int:x int:y] [return [+ x y]]] \
             [defn int:main [void] [return [f g 2]]]",
        );

        assert!(code.contains("int g = 5;\n"));
        assert!(code.contains("int f(int x, int y);\n"));
        assert!(code.contains("return (f(g, 2));\n"));
    }

    #[test]
    fn test_emit_recursive_struct_through_pointer() {
        let code = emit_source("[struct N [let N*:next]] [defn int:main [void] [return 0]]");

        assert!(code.contains("typedef struct N N;\n"));
        assert!(code.contains("typedef struct N {\n    N* next;\n} N;\n"));
    }

    #[test]
    fn test_emit_inline_struct_field() {
        let code = emit_source(
            "[struct Inner [let int:x]] \
             [struct Outer [let Inner:inner] [let Inner*:ptr]] \
             [defn int:main [void] [return 0]]",
        );

        assert!(code.contains("struct {\n        int x;\n    } inner;\n"));
        assert!(code.contains("Inner* ptr;\n"));
    }

    #[test]
    fn test_emit_is_deterministic() {
        let input = "[struct P [let int:x]] [let int:g] \
                     [defn int:main [void] [for i to 3 [set g [+ g i]]] [return g]]";

        assert_eq!(emit_source(input), emit_source(input));
    }

    #[test]
    fn test_emitted_braces_are_balanced() {
        let code = emit_source(
            "[struct P [let int:x]] \
             [defn int:f [P*:p] [if [= [deref [addr p.x]] 0] [return 1]] [return 0]] \
             [defn int:main [void] [while false [for i to 2]] [return 0]]",
        );

        let opens = code.matches('{').count();
        let closes = code.matches('}').count();
        assert_eq!(opens, closes);
    }
}

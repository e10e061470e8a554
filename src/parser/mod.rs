//! Recursive-descent parser for the bracketed Ether syntax.
//!
//! Every statement and declaration is a `[head ...]` form. On a syntax error
//! the parser goes into panic mode: it reports one diagnostic, then discards
//! tokens until the balancing `]` of the current statement (or EOF) and
//! resumes at the next statement.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{
    DataType, Expr, Field, ForStmt, FuncDecl, IfBranch, IfStmt, ReturnStmt, Stmt, StructDecl,
    VarDecl, VarDeclStmt, WhileStmt,
};
use crate::diagnostics::{self, Level};
use crate::intern::{Interner, Keywords, Symbol};
use crate::lexer::{Token, TokenKind};
use crate::source::SourceFile;

/// Result of parsing one file: its top-level statements plus the `load`
/// directives found along the way (consumed by the loader, not part of the
/// AST).
#[derive(Debug)]
pub struct ParseOutput {
    pub stmts: Vec<Stmt>,
    pub loads: Vec<Token>,
    pub error_occurred: bool,
    pub error_count: u32,
    pub warning_count: u32,
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    file: &'a SourceFile,
    interner: &'a Interner,
    kw: &'a Keywords,
    idx: usize,
    stmts: Vec<Stmt>,
    loads: Vec<Token>,
    error_count: u32,
    warning_count: u32,
    error_occurred: bool,
    error_panic: bool,
    /// Brackets opened since the current statement's own opening bracket;
    /// panic-mode recovery needs it to find the statement's balancing `]`.
    bracket_depth: u32,
    /// Return type and identifier of the function being parsed, captured
    /// into `return` statements.
    current_function: Option<(DataType, Token)>,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: &'a [Token],
        file: &'a SourceFile,
        interner: &'a Interner,
        kw: &'a Keywords,
    ) -> Self {
        Self {
            tokens,
            file,
            interner,
            kw,
            idx: 0,
            stmts: vec![],
            loads: vec![],
            error_count: 0,
            warning_count: 0,
            error_occurred: false,
            error_panic: false,
            bracket_depth: 0,
            current_function: None,
        }
    }

    pub fn parse(mut self) -> ParseOutput {
        while self.current().kind != TokenKind::Eof {
            if let Some(stmt) = self.parse_decl() {
                self.stmts.push(stmt);
            }
        }

        ParseOutput {
            stmts: self.stmts,
            loads: self.loads,
            error_occurred: self.error_occurred,
            error_count: self.error_count,
            warning_count: self.warning_count,
        }
    }

    /// Top-level forms only: structs, functions, globals, `load`.
    fn parse_decl(&mut self) -> Option<Stmt> {
        self.error_panic = false;
        self.bracket_depth = 0;
        self.expect_token(TokenKind::LeftBracket, "expected '[' here:")?;
        self.bracket_depth = 0;

        if self.match_keyword(self.kw.struct_) {
            let identifier = self.consume_identifier()?;
            self.parse_struct(identifier)
        } else if self.match_keyword(self.kw.let_) {
            let data_type = self.consume_data_type()?;
            self.consume_colon()?;
            let identifier = self.consume_identifier()?;
            self.parse_var_decl(data_type, identifier, true)
        } else if self.match_keyword(self.kw.defn) {
            let public = self.match_keyword(self.kw.pub_);
            self.parse_func(public)
        } else if self.match_keyword(self.kw.decl) {
            self.parse_func_decl()
        } else if self.match_keyword(self.kw.load) {
            self.parse_load_stmt()
        } else {
            self.error_at_current(
                "expected keyword 'load', 'struct', 'defn', 'decl' or 'let' in global scope; \
                 did you miss a ']'?",
            );
            None
        }
    }

    /// Statements inside a function body.
    fn parse_stmt(&mut self) -> Option<Stmt> {
        self.error_panic = false;
        self.bracket_depth = 0;
        self.expect_token(TokenKind::LeftBracket, "expected '[' here:")?;
        self.bracket_depth = 0;

        if self.match_keyword(self.kw.let_) {
            let data_type = self.consume_data_type()?;
            self.consume_colon()?;
            let identifier = self.consume_identifier()?;
            self.parse_var_decl(data_type, identifier, false)
        } else if self.match_keyword(self.kw.return_) {
            self.parse_return_stmt()
        } else if self.match_keyword(self.kw.if_) {
            self.parse_if_stmt()
        } else if self.match_keyword(self.kw.for_) {
            self.parse_for_stmt()
        } else if self.match_keyword(self.kw.while_) {
            self.parse_while_stmt()
        } else if self.match_keyword(self.kw.elif) || self.match_keyword(self.kw.else_) {
            let previous = self.previous_token();
            self.error_at(
                previous,
                &format!(
                    "'{}' branch without preceding 'if' statement; did you mean 'if'?",
                    self.interner.resolve(previous.lexeme)
                ),
            );
            None
        } else if self.match_keyword(self.kw.struct_) {
            let previous = self.previous_token();
            self.error_at(
                previous,
                "cannot define a type inside a function-scope; did you miss a ']'?",
            );
            None
        } else if self.match_keyword(self.kw.defn) {
            let previous = self.previous_token();
            self.error_at(
                previous,
                "cannot define a function inside a function-scope; did you miss a ']'?",
            );
            None
        } else if self.match_keyword(self.kw.decl) {
            let previous = self.previous_token();
            self.error_at(
                previous,
                "cannot declare a function inside a function-scope; did you miss a ']'?",
            );
            None
        } else {
            // re-parse the opening bracket as the head of a call expression
            self.retreat();
            self.parse_expr_stmt()
        }
    }

    fn parse_struct(&mut self, identifier: Token) -> Option<Stmt> {
        let mut fields = vec![];
        if !self.match_right_bracket() {
            loop {
                self.consume_left_bracket()?;
                if !self.match_keyword(self.kw.let_) {
                    self.error_at_current("expected 'let' keyword here:");
                } else {
                    let data_type = self.consume_data_type()?;
                    self.consume_colon()?;
                    let field_identifier = self.consume_identifier()?;
                    fields.push(Field {
                        data_type,
                        identifier: field_identifier,
                    });
                    self.consume_right_bracket()?;
                }
                self.check_eof()?;
                if self.match_right_bracket() {
                    break;
                }
            }
        }

        Some(Stmt::Struct(Rc::new(StructDecl { identifier, fields })))
    }

    fn parse_func(&mut self, public: bool) -> Option<Stmt> {
        let (return_type, identifier, params) = self.parse_func_header()?;
        self.current_function = Some((return_type.clone(), identifier));

        let mut body = vec![];
        while !self.match_right_bracket() {
            self.check_eof()?;
            if let Some(stmt) = self.parse_stmt() {
                body.push(stmt);
            }
        }
        self.current_function = None;

        Some(Stmt::Func(Rc::new(FuncDecl {
            return_type,
            identifier,
            params,
            body: RefCell::new(body),
            is_definition: true,
            public,
        })))
    }

    fn parse_func_decl(&mut self) -> Option<Stmt> {
        let (return_type, identifier, params) = self.parse_func_header()?;
        self.consume_right_bracket()?;

        Some(Stmt::Func(Rc::new(FuncDecl {
            return_type,
            identifier,
            params,
            body: RefCell::new(vec![]),
            is_definition: false,
            public: true,
        })))
    }

    fn parse_func_header(&mut self) -> Option<(DataType, Token, Vec<Rc<VarDecl>>)> {
        let return_type = self.consume_data_type()?;
        self.consume_colon()?;
        let identifier = self.consume_identifier()?;
        self.consume_left_bracket()?;

        let mut params = vec![];

        let void_placeholder = self.current().kind == TokenKind::Keyword
            && self.current().lexeme == self.kw.void
            && self.peek_next_is(TokenKind::RightBracket);

        if void_placeholder {
            self.advance();
            self.consume_right_bracket()?;
        } else if self.current().kind == TokenKind::RightBracket {
            // mark the opening bracket as the cause
            let bracket = self.previous_token();
            self.warning_at(bracket, "empty function parameter list here:");
            self.match_right_bracket();
        } else {
            loop {
                let data_type = self.consume_data_type()?;
                self.consume_colon()?;
                let name = self.consume_identifier()?;
                params.push(Rc::new(VarDecl {
                    data_type: Some(data_type),
                    identifier: name,
                    is_global: false,
                }));
                self.check_eof()?;
                if self.match_right_bracket() {
                    break;
                }
            }
        }

        Some((return_type, identifier, params))
    }

    fn parse_load_stmt(&mut self) -> Option<Stmt> {
        let path = self.expect_token(TokenKind::Str, "expected string here:")?;
        self.consume_right_bracket()?;
        self.loads.push(path);
        None
    }

    fn parse_var_decl(
        &mut self,
        data_type: DataType,
        identifier: Token,
        is_global: bool,
    ) -> Option<Stmt> {
        let initializer = if self.match_right_bracket() {
            None
        } else {
            let init = self.parse_expr()?;
            self.consume_right_bracket()?;
            Some(init)
        };

        Some(Stmt::VarDecl(VarDeclStmt {
            decl: Rc::new(VarDecl {
                data_type: Some(data_type),
                identifier,
                is_global,
            }),
            initializer,
        }))
    }

    fn parse_if_stmt(&mut self) -> Option<Stmt> {
        let if_branch = self.parse_if_branch(true)?;

        let mut elif_branches = vec![];
        while self.peek_branch_keyword(self.kw.elif) {
            self.match_left_bracket();
            self.advance();
            elif_branches.push(self.parse_if_branch(true)?);
        }

        let else_branch = if self.peek_branch_keyword(self.kw.else_) {
            self.match_left_bracket();
            self.advance();
            Some(self.parse_if_branch(false)?)
        } else {
            None
        };

        Some(Stmt::If(IfStmt {
            if_branch,
            elif_branches,
            else_branch,
        }))
    }

    fn parse_if_branch(&mut self, has_cond: bool) -> Option<IfBranch> {
        let cond = if has_cond {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut body = vec![];
        while !self.match_right_bracket() {
            self.check_eof()?;
            if let Some(stmt) = self.parse_stmt() {
                body.push(stmt);
            }
        }

        Some(IfBranch { cond, body })
    }

    fn parse_for_stmt(&mut self) -> Option<Stmt> {
        let identifier = self.consume_identifier()?;
        if !self.match_keyword(self.kw.to) {
            self.error_at_current("expected 'to' keyword here:");
            return None;
        }

        let to = self.parse_expr()?;

        let mut body = vec![];
        while !self.match_right_bracket() {
            self.check_eof()?;
            if let Some(stmt) = self.parse_stmt() {
                body.push(stmt);
            }
        }

        // counter type is established by the emitter
        Some(Stmt::For(ForStmt {
            counter: Rc::new(VarDecl {
                data_type: None,
                identifier,
                is_global: false,
            }),
            to,
            body,
        }))
    }

    fn parse_while_stmt(&mut self) -> Option<Stmt> {
        let cond = self.parse_expr()?;

        let mut body = vec![];
        while !self.match_right_bracket() {
            self.check_eof()?;
            if let Some(stmt) = self.parse_stmt() {
                body.push(stmt);
            }
        }

        Some(Stmt::While(WhileStmt { cond, body }))
    }

    fn parse_return_stmt(&mut self) -> Option<Stmt> {
        let keyword = self.previous_token();
        let expr = if self.match_right_bracket() {
            None
        } else {
            let expr = self.parse_expr()?;
            self.consume_right_bracket()?;
            Some(expr)
        };

        let Some((return_type, function_identifier)) = self.current_function.clone() else {
            unreachable!("'return' statements only parse inside a function body");
        };

        Some(Stmt::Return(ReturnStmt {
            keyword,
            expr,
            return_type,
            function_identifier,
        }))
    }

    fn parse_expr_stmt(&mut self) -> Option<Stmt> {
        let expr = self.parse_expr()?;
        Some(Stmt::Expr(expr))
    }

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_dot_access()
    }

    fn parse_dot_access(&mut self) -> Option<Expr> {
        let mut left = self.parse_primary()?;
        while self.match_token(TokenKind::Dot) {
            let right = self.consume_identifier()?;
            left = Expr::dot_access(left, right);
        }
        Some(left)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        if self.match_token(TokenKind::Number) {
            Some(Expr::number(self.previous_token()))
        } else if self.match_token(TokenKind::Char) {
            Some(Expr::chr(self.previous_token()))
        } else if self.match_token(TokenKind::Str) {
            Some(Expr::string(self.previous_token()))
        } else if self.match_token(TokenKind::Identifier) {
            let token = self.previous_token();
            if token.lexeme == self.kw.null {
                Some(Expr::null(token))
            } else if token.lexeme == self.kw.true_ || token.lexeme == self.kw.false_ {
                Some(Expr::boolean(token))
            } else {
                Some(Expr::variable(token))
            }
        } else if self.match_left_bracket() {
            self.parse_func_call()
        } else {
            self.error_at_current(&format!(
                "invalid syntax; expected identifier, literal, or grouping but got '{}'",
                self.interner.resolve(self.current().lexeme)
            ));
            None
        }
    }

    fn parse_func_call(&mut self) -> Option<Expr> {
        let callee = match self.current().kind {
            TokenKind::Identifier
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Equal
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                let token = self.current();
                self.advance();
                token
            }
            TokenKind::Keyword if self.kw.is_operator_keyword(self.current().lexeme) => {
                let token = self.current();
                self.advance();
                token
            }
            _ => {
                self.error_at_current("expected identifier or operator here:");
                return None;
            }
        };

        let mut args = vec![];
        if !self.match_right_bracket() {
            loop {
                let arg = self.parse_expr()?;
                args.push(arg);
                self.check_eof()?;
                if self.match_right_bracket() {
                    break;
                }
            }
        }

        Some(Expr::func_call(callee, args))
    }

    fn match_data_type(&mut self) -> Option<DataType> {
        let main = if self.match_token(TokenKind::Identifier) {
            Some(self.previous_token())
        } else if self.current().kind == TokenKind::Keyword
            && self.kw.is_primitive(self.current().lexeme)
        {
            let token = self.current();
            self.advance();
            Some(token)
        } else {
            None
        };

        main.map(|main| {
            let mut pointer_count: u8 = 0;
            while self.match_token(TokenKind::Star) {
                pointer_count = pointer_count.saturating_add(1);
            }
            DataType::new(main, pointer_count)
        })
    }

    fn consume_data_type(&mut self) -> Option<DataType> {
        match self.match_data_type() {
            Some(data_type) => Some(data_type),
            None => {
                self.error_at_current("expected data type here:");
                None
            }
        }
    }

    fn consume_left_bracket(&mut self) -> Option<Token> {
        self.expect_token(TokenKind::LeftBracket, "expected '[' here:")
    }

    fn consume_right_bracket(&mut self) -> Option<Token> {
        self.expect_token(TokenKind::RightBracket, "expected ']' here:")
    }

    fn consume_colon(&mut self) -> Option<Token> {
        self.expect_token(TokenKind::Colon, "expected ':' here:")
    }

    fn consume_identifier(&mut self) -> Option<Token> {
        self.expect_token(TokenKind::Identifier, "expected identifier here:")
    }

    fn expect_token(&mut self, kind: TokenKind, msg: &str) -> Option<Token> {
        if self.match_token(kind) {
            return Some(self.previous_token());
        }
        self.error_at_current(msg);
        None
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.current().kind != kind {
            return false;
        }
        match kind {
            TokenKind::LeftBracket => self.bracket_depth += 1,
            TokenKind::RightBracket => self.bracket_depth = self.bracket_depth.saturating_sub(1),
            _ => {}
        }
        self.advance();
        true
    }

    fn match_left_bracket(&mut self) -> bool {
        self.match_token(TokenKind::LeftBracket)
    }

    fn match_right_bracket(&mut self) -> bool {
        self.match_token(TokenKind::RightBracket)
    }

    fn match_keyword(&mut self, sym: Symbol) -> bool {
        if self.current().kind == TokenKind::Keyword && self.current().lexeme == sym {
            self.advance();
            return true;
        }
        false
    }

    fn peek_next_is(&self, kind: TokenKind) -> bool {
        self.tokens
            .get(self.idx + 1)
            .map(|t| t.kind == kind)
            .unwrap_or(false)
    }

    fn peek_branch_keyword(&self, sym: Symbol) -> bool {
        self.current().kind == TokenKind::LeftBracket
            && self
                .tokens
                .get(self.idx + 1)
                .map(|t| t.kind == TokenKind::Keyword && t.lexeme == sym)
                .unwrap_or(false)
    }

    fn check_eof(&mut self) -> Option<()> {
        if self.current().kind == TokenKind::Eof {
            self.error_at_current("end of file while parsing function body; did you forget a ']'?");
            return None;
        }
        Some(())
    }

    fn current(&self) -> Token {
        self.tokens[self.idx]
    }

    fn previous_token(&self) -> Token {
        self.tokens[self.idx.saturating_sub(1)]
    }

    fn advance(&mut self) {
        if self.idx + 1 < self.tokens.len() {
            self.idx += 1;
        }
    }

    fn retreat(&mut self) {
        if self.idx > 0 {
            self.idx -= 1;
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        let token = self.current();
        self.error_at(token, msg);
    }

    fn error_at(&mut self, token: Token, msg: &str) {
        if self.error_panic {
            return;
        }
        self.error_panic = true;

        diagnostics::report_in(self.file, &token, Level::Error, msg);
        self.sync_to_next_statement();

        self.error_occurred = true;
        self.error_count += 1;
    }

    fn warning_at(&mut self, token: Token, msg: &str) {
        diagnostics::report_in(self.file, &token, Level::Warning, msg);
        self.warning_count += 1;
    }

    /// Panic-mode recovery: discard tokens until the balancing `]` of the
    /// current statement. Brackets already opened inside the statement are
    /// accounted for by `bracket_depth`.
    fn sync_to_next_statement(&mut self) {
        let mut depth = self.bracket_depth;
        loop {
            match self.current().kind {
                TokenKind::RightBracket => {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                TokenKind::LeftBracket => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::Eof => {
                    self.error_count += 1;
                    return;
                }
                _ => self.advance(),
            }
        }
    }
}

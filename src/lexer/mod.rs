//! Lexer for Ether source files.
//!
//! Produces a finite token sequence terminated by a synthetic EOF token. The
//! lexer works on raw bytes; everything outside string and char literals is
//! ASCII. Lexemes are interned as they are read.

mod token;

pub use token::*;

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::diagnostics::{self, Level};
use crate::intern::{Interner, Symbol};
use crate::source::{SourceFile, SourceId};

/// Hard cap on lexical errors before the lexer gives up on the file.
pub const LEXER_ERROR_COUNT_MAX: u32 = 10;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "struct", "defn", "decl", "pub", "load", "let", "if", "elif", "else", "for", "to",
        "while", "return", "set", "deref", "addr", "at", "int", "i8", "i16", "i32", "i64",
        "u8", "u16", "u32", "u64", "char", "bool", "void",
    ]
    .into_iter()
    .collect()
});

pub struct Lexer<'a> {
    file: &'a SourceFile,
    id: SourceId,
    interner: &'a mut Interner,
    tokens: Vec<Token>,
    start: usize,
    cur: usize,
    line: u64,
    last_newline: Option<usize>,
    last_to_last_newline: Option<usize>,
    error_count: u32,
    error_occurred: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a SourceFile, id: SourceId, interner: &'a mut Interner) -> Self {
        Self {
            file,
            id,
            interner,
            tokens: vec![],
            start: 0,
            cur: 0,
            line: 1,
            last_newline: None,
            last_to_last_newline: None,
            error_count: 0,
            error_occurred: false,
        }
    }

    /// Lex the whole file. On failure the tokens read so far are returned
    /// anyway, but without a terminating EOF token.
    pub fn lex(mut self) -> (Vec<Token>, bool) {
        while self.cur < self.file.contents.len() {
            self.start = self.cur;
            match self.byte(self.cur) {
                b':' => self.add_token(TokenKind::Colon),
                b'+' => self.add_token(TokenKind::Plus),
                b'-' => self.add_token(TokenKind::Minus),
                b'*' => self.add_token(TokenKind::Star),
                b'/' => self.add_token(TokenKind::Slash),
                b'%' => self.add_token(TokenKind::Percent),
                b'[' => self.add_token(TokenKind::LeftBracket),
                b']' => self.add_token(TokenKind::RightBracket),
                b'=' => self.add_token(TokenKind::Equal),
                b',' => self.add_token(TokenKind::Comma),
                b'.' => self.add_token(TokenKind::Dot),
                b'<' => {
                    if self.match_byte(b'=') {
                        self.add_token(TokenKind::LessEqual);
                    } else {
                        self.add_token(TokenKind::Less);
                    }
                }
                b'>' => {
                    if self.match_byte(b'=') {
                        self.add_token(TokenKind::GreaterEqual);
                    } else {
                        self.add_token(TokenKind::Greater);
                    }
                }

                b'"' => self.lex_string(),
                b'\'' => self.lex_char(),
                b'\n' => self.lex_newline(),

                b'\t' | b'\r' | b' ' => self.cur += 1,

                b';' => {
                    if self.match_byte(b';') {
                        self.lex_comment();
                    } else {
                        self.error_at_current("invalid semicolon; did you mean ';;'?");
                        self.cur += 1;
                    }
                }

                b'A'..=b'Z' | b'a'..=b'z' | b'_' => self.lex_identifier(),

                b'0'..=b'9' => self.lex_number(),

                c => {
                    self.error_at_current(&format!(
                        "invalid char literal '{}' (dec: {})",
                        c as char, c
                    ));
                    self.cur += 1;
                }
            }

            if self.error_count > LEXER_ERROR_COUNT_MAX {
                println!(
                    "note: error count ({}) exceeded limit; aborting...",
                    self.error_count
                );
                return (self.tokens, true);
            }
        }

        self.add_eof();
        (self.tokens, self.error_occurred)
    }

    fn byte(&self, idx: usize) -> u8 {
        self.file.contents.as_bytes()[idx]
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.cur + 1 < self.file.contents.len() && self.byte(self.cur + 1) == expected {
            self.cur += 1;
            return true;
        }
        false
    }

    fn lex_identifier(&mut self) {
        self.cur += 1;
        while self.cur < self.file.contents.len() {
            match self.byte(self.cur) {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' => self.cur += 1,
                _ => break,
            }
        }

        let text = &self.file.contents[self.start..self.cur];
        let kind = if KEYWORDS.contains(text) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        let lexeme = self.interner.intern(text);
        self.push_token(kind, lexeme);
    }

    fn lex_number(&mut self) {
        while self.cur < self.file.contents.len() && self.byte(self.cur).is_ascii_digit() {
            self.cur += 1;
        }

        if self.cur < self.file.contents.len() && self.byte(self.cur) == b'.' {
            self.cur += 1;
            let mut after_dot = false;
            while self.cur < self.file.contents.len() && self.byte(self.cur).is_ascii_digit() {
                self.cur += 1;
                after_dot = true;
            }
            if !after_dot {
                self.error_at_current("expected digit after '.' in floating-point number");
            }
        }

        let lexeme = self.interner.intern(&self.file.contents[self.start..self.cur]);
        self.push_token(TokenKind::Number, lexeme);
    }

    fn lex_string(&mut self) {
        self.start += 1;
        self.cur += 1;
        loop {
            if self.cur >= self.file.contents.len() {
                self.error_at_current("missing terminating '\"'");
                return;
            }
            if self.byte(self.cur) == b'"' {
                break;
            }
            self.cur += 1;
        }

        // the stored lexeme excludes the delimiters
        let lexeme = self.interner.intern(&self.file.contents[self.start..self.cur]);
        self.push_token(TokenKind::Str, lexeme);
        self.cur += 1;
    }

    fn lex_char(&mut self) {
        // TODO: escape sequences
        self.start += 1;
        self.cur += 2;
        if self.cur >= self.file.contents.len() || self.byte(self.cur) != b'\'' {
            self.error_at_current("missing terminating \"'\"");
        }

        let end = (self.start + 1).min(self.file.contents.len());
        let text =
            String::from_utf8_lossy(&self.file.contents.as_bytes()[self.start..end]).into_owned();
        let lexeme = self.interner.intern(&text);
        self.push_token(TokenKind::Char, lexeme);
        self.cur = end + 1;
    }

    fn lex_comment(&mut self) {
        while self.cur < self.file.contents.len() && self.byte(self.cur) != b'\n' {
            self.cur += 1;
        }
    }

    fn lex_newline(&mut self) {
        self.last_to_last_newline = self.last_newline;
        self.last_newline = Some(self.cur);
        self.line += 1;
        self.cur += 1;
    }

    /// Single- and double-character punctuation; the token covers
    /// `start..=cur` and the cursor moves past it.
    fn add_token(&mut self, kind: TokenKind) {
        self.cur += 1;
        let lexeme = self.interner.intern(&self.file.contents[self.start..self.cur]);
        self.push_token(kind, lexeme);
    }

    fn push_token(&mut self, kind: TokenKind, lexeme: Symbol) {
        let token = Token {
            kind,
            lexeme,
            file: self.id,
            line: self.line,
            column: self.column_at(self.start),
        };
        self.tokens.push(token);
    }

    /// The EOF token points just past the last character. When the file ends
    /// with a newline the anchor stays on the last non-empty line.
    fn add_eof(&mut self) {
        let len = self.file.contents.len();
        let (line, column) = if self.file.contents.ends_with('\n') {
            let line_start = self.last_to_last_newline.map(|i| i + 1).unwrap_or(0);
            (self.line - 1, (len - 1 - line_start) as u32 + 1)
        } else {
            let line_start = self.last_newline.map(|i| i + 1).unwrap_or(0);
            (self.line, (len - line_start) as u32 + 1)
        };

        let lexeme = self.interner.intern("");
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            lexeme,
            file: self.id,
            line,
            column,
        });
    }

    fn column_at(&self, pos: usize) -> u32 {
        match self.last_newline {
            None => pos as u32 + 1,
            Some(i) => (pos - i) as u32,
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        diagnostics::report_at(
            self.file,
            self.line,
            self.column_at(self.start),
            Level::Error,
            msg,
        );
        self.error_occurred = true;
        self.error_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceMap;

    fn lex(input: &str) -> (Vec<Token>, bool, Interner) {
        let mut sources = SourceMap::new();
        let id = sources.add("test.eth".into(), input.into());
        let mut interner = Interner::new();
        let (tokens, error) = Lexer::new(sources.file(id), id, &mut interner).lex();
        (tokens, error, interner)
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_main_skeleton() {
        let (tokens, error, interner) = lex("[defn int:main [void] [return 0]]");

        assert!(!error);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::LeftBracket,
                TokenKind::Keyword,
                TokenKind::Keyword,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::LeftBracket,
                TokenKind::Keyword,
                TokenKind::RightBracket,
                TokenKind::LeftBracket,
                TokenKind::Keyword,
                TokenKind::Number,
                TokenKind::RightBracket,
                TokenKind::RightBracket,
                TokenKind::Eof,
            ]
        );
        assert_eq!(interner.resolve(tokens[1].lexeme), "defn");
        assert_eq!(interner.resolve(tokens[4].lexeme), "main");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);
        assert_eq!(tokens[1].column, 2);
    }

    #[test]
    fn test_lex_positions_across_lines() {
        let (tokens, error, _) = lex("[let\nint:x]");

        assert!(!error);
        // "int" is the first token of line 2
        assert_eq!(tokens[2].line, 2);
        assert_eq!(tokens[2].column, 1);
        assert_eq!(tokens[3].kind, TokenKind::Colon);
        assert_eq!(tokens[3].column, 4);
    }

    #[test]
    fn test_lex_comparison_operators() {
        let (tokens, error, _) = lex("< <= > >= =");

        assert!(!error);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Equal,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_string_excludes_quotes() {
        let (tokens, error, interner) = lex("\"hello world\"");

        assert!(!error);
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(interner.resolve(tokens[0].lexeme), "hello world");
    }

    #[test]
    fn test_lex_char_literal() {
        let (tokens, error, interner) = lex("'a'");

        assert!(!error);
        assert_eq!(tokens[0].kind, TokenKind::Char);
        assert_eq!(interner.resolve(tokens[0].lexeme), "a");
    }

    #[test]
    fn test_lex_unterminated_string() {
        let (_, error, _) = lex("\"oops");

        assert!(error);
    }

    #[test]
    fn test_lex_comment_runs_to_end_of_line() {
        let (tokens, error, _) = lex(";; a comment\n42");

        assert!(!error);
        assert_eq!(kinds(&tokens), vec![TokenKind::Number, TokenKind::Eof]);
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn test_lex_single_semicolon_is_an_error() {
        let (_, error, _) = lex("; not a comment");

        assert!(error);
    }

    #[test]
    fn test_lex_float_without_digits_after_dot() {
        let (_, error, _) = lex("13.");

        assert!(error);
    }

    #[test]
    fn test_lex_float_literal() {
        let (tokens, error, interner) = lex("13.37");

        assert!(!error);
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(interner.resolve(tokens[0].lexeme), "13.37");
    }

    #[test]
    fn test_lex_error_budget() {
        // twelve stray semicolons blow the ten-error budget
        let (tokens, error, _) = lex("; ; ; ; ; ; ; ; ; ; ; ;");

        assert!(error);
        // aborted before the EOF token was appended
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Eof));
    }

    #[test]
    fn test_lex_eof_after_trailing_newline() {
        let (tokens, error, _) = lex("[x]\n");

        assert!(!error);
        let eof = tokens.last().unwrap();
        assert_eq!(eof.kind, TokenKind::Eof);
        assert_eq!(eof.line, 1);
        assert_eq!(eof.column, 4);
    }

    #[test]
    fn test_lex_keywords_are_interned_once() {
        let (tokens, error, _) = lex("let let");

        assert!(!error);
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[0].lexeme, tokens[1].lexeme);
    }
}

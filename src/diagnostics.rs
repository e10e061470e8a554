//! Diagnostic rendering.
//!
//! Every diagnostic prints one `path:line:col: <level>: <message>` line,
//! followed by the offending source line in a gutter and a caret marker
//! underneath the offending column. Related locations follow the primary
//! diagnostic as `note`s.

use colored::{ColoredString, Colorize};

use crate::lexer::Token;
use crate::source::{SourceFile, SourceMap};
use crate::TAB_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Note,
}

impl Level {
    fn header(self) -> ColoredString {
        match self {
            Level::Error => "error".red(),
            Level::Warning => "warning".yellow(),
            Level::Note => "note".cyan(),
        }
    }

    fn paint(self, s: &str) -> ColoredString {
        match self {
            Level::Error => s.red(),
            Level::Warning => s.yellow(),
            Level::Note => s.cyan(),
        }
    }
}

/// Report a diagnostic anchored at `token`, resolving its file through the
/// source map.
pub fn report(sources: &SourceMap, token: &Token, level: Level, msg: &str) {
    report_in(sources.file(token.file), token, level, msg);
}

/// Report a diagnostic anchored at `token` inside a known file.
pub fn report_in(file: &SourceFile, token: &Token, level: Level, msg: &str) {
    report_at(file, token.line, token.column, level, msg);
}

/// Report a diagnostic at an explicit position.
pub fn report_at(file: &SourceFile, line: u64, column: u32, level: Level, msg: &str) {
    println!(
        "{}:{}:{}: {}: {}",
        file.path.display(),
        line,
        column,
        level.header(),
        msg
    );
    print_file_line(file, line);
    print_marker_arrow(file, line, column, level);
}

/// Report a diagnostic that has no source position (e.g. a missing `main`).
pub fn report_plain(level: Level, msg: &str) {
    println!("{}: {}", level.header(), msg);
}

fn print_file_line(file: &SourceFile, line: u64) {
    let Some(text) = file.line(line) else {
        return;
    };
    print!("{:>6} | ", line);
    for c in text.chars() {
        if c == '\t' {
            print!("{}", " ".repeat(TAB_SIZE));
        } else {
            print!("{c}");
        }
    }
    println!();
}

fn print_marker_arrow(file: &SourceFile, line: u64, column: u32, level: Level) {
    let Some(text) = file.line(line) else {
        return;
    };
    print!("{:>6} | ", "");
    let mut chars = text.chars();
    for _ in 1..column {
        match chars.next() {
            Some('\t') => print!("{}", " ".repeat(TAB_SIZE)),
            _ => print!(" "),
        }
    }
    println!("{}", level.paint("^"));
}

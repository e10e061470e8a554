//! Multi-file loading via the `load` directive.
//!
//! `[load "relative/path"]` pulls another source file into the compilation
//! unit. Paths resolve against the directory of the file containing the
//! directive. Every file runs through the same lexer and parser; its
//! top-level declarations are merged into the program as an own file entry.
//! A file that was already loaded is skipped, which also breaks cycles and
//! self-inclusion.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use log::debug;

use crate::ast::{ParsedFile, Program};
use crate::diagnostics::{self, Level};
use crate::intern::{Interner, Keywords};
use crate::lexer::{Lexer, Token};
use crate::parser::Parser;
use crate::source::SourceMap;

pub struct Loader<'a> {
    sources: &'a mut SourceMap,
    interner: &'a mut Interner,
    kw: &'a Keywords,
    loaded: HashSet<PathBuf>,
    error_occurred: bool,
}

impl<'a> Loader<'a> {
    pub fn new(
        sources: &'a mut SourceMap,
        interner: &'a mut Interner,
        kw: &'a Keywords,
    ) -> Self {
        Self {
            sources,
            interner,
            kw,
            loaded: HashSet::new(),
            error_occurred: false,
        }
    }

    /// Lex and parse the entry file (whose contents the driver has already
    /// read) and everything it loads, transitively.
    pub fn run(mut self, entry_path: PathBuf, entry_contents: String) -> (Program, bool) {
        let mut program = Program::default();

        // (path, contents if already read, directive token for diagnostics)
        let mut queue: VecDeque<(PathBuf, Option<String>, Option<Token>)> = VecDeque::new();
        queue.push_back((entry_path, Some(entry_contents), None));

        while let Some((path, contents, directive)) = queue.pop_front() {
            let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if !self.loaded.insert(canonical) {
                // already part of the compilation unit
                continue;
            }

            let contents = match contents {
                Some(contents) => contents,
                None => match fs::read_to_string(&path) {
                    Ok(contents) => contents,
                    Err(_) => {
                        // only loaded files end up here; the driver checks
                        // the entry file itself
                        if let Some(token) = directive {
                            let msg = format!(
                                "cannot find \"{}\" (relative_to_working_dir: \"{}\");",
                                self.interner.resolve(token.lexeme),
                                path.display(),
                            );
                            diagnostics::report(self.sources, &token, Level::Error, &msg);
                        }
                        self.error_occurred = true;
                        continue;
                    }
                },
            };

            debug!("loading '{}'", path.display());

            let id = self.sources.add(path.clone(), contents);
            let (tokens, lex_error) =
                Lexer::new(self.sources.file(id), id, self.interner).lex();
            if lex_error {
                self.error_occurred = true;
                continue;
            }

            let parsed =
                Parser::new(&tokens, self.sources.file(id), self.interner, self.kw).parse();
            if parsed.error_occurred {
                self.error_occurred = true;
            }

            let folder = path.parent().map(PathBuf::from).unwrap_or_default();
            for load in parsed.loads {
                let target = folder.join(self.interner.resolve(load.lexeme));
                queue.push_back((target, None, Some(load)));
            }

            program.files.push(ParsedFile {
                source: id,
                stmts: parsed.stmts,
            });
        }

        (program, self.error_occurred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ether-loader-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn load(entry: PathBuf) -> (Program, SourceMap, bool) {
        let mut sources = SourceMap::new();
        let mut interner = Interner::new();
        let kw = Keywords::new(&mut interner);
        let contents = fs::read_to_string(&entry).unwrap();
        let (program, error) =
            Loader::new(&mut sources, &mut interner, &kw).run(entry, contents);
        (program, sources, error)
    }

    #[test]
    fn test_load_merges_declarations() {
        let dir = scratch_dir("merge");
        write_file(&dir, "lib.eth", "[defn int:helper [void] [return 1]]");
        let entry = write_file(
            &dir,
            "main.eth",
            "[load \"lib.eth\"] [defn int:main [void] [return [helper]]]",
        );

        let (program, sources, error) = load(entry);

        assert!(!error);
        assert_eq!(program.files.len(), 2);
        assert_eq!(sources.len(), 2);
        // entry first, loaded file after
        assert_eq!(program.files[0].stmts.len(), 1);
        assert_eq!(program.files[1].stmts.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = scratch_dir("missing");
        let entry = write_file(&dir, "main.eth", "[load \"nope.eth\"] [defn int:main [void]]");

        let (program, _, error) = load(entry);

        assert!(error);
        assert_eq!(program.files.len(), 1);
    }

    #[test]
    fn test_load_cycle_is_broken() {
        let dir = scratch_dir("cycle");
        write_file(&dir, "a.eth", "[load \"b.eth\"]");
        write_file(&dir, "b.eth", "[load \"a.eth\"]");
        let entry = write_file(&dir, "main.eth", "[load \"a.eth\"] [defn int:main [void]]");

        let (program, _, error) = load(entry);

        assert!(!error);
        // main, a, b — each exactly once
        assert_eq!(program.files.len(), 3);
    }

    #[test]
    fn test_self_inclusion_is_loaded_once() {
        let dir = scratch_dir("self");
        let entry = write_file(
            &dir,
            "main.eth",
            "[load \"main.eth\"] [defn int:main [void] [return 0]]",
        );

        let (program, _, error) = load(entry);

        assert!(!error);
        assert_eq!(program.files.len(), 1);
    }

    #[test]
    fn test_load_resolves_relative_to_including_file() {
        let dir = scratch_dir("relative");
        let sub = dir.join("sub");
        fs::create_dir_all(&sub).unwrap();
        write_file(&sub, "inner.eth", "[defn int:helper [void] [return 1]]");
        write_file(&dir, "outer.eth", "[load \"sub/inner.eth\"]");
        let entry = write_file(
            &dir,
            "main.eth",
            "[load \"outer.eth\"] [defn int:main [void] [return 0]]",
        );

        let (program, _, error) = load(entry);

        assert!(!error);
        assert_eq!(program.files.len(), 3);
    }
}

use std::path::PathBuf;
use std::process::exit;

use clap::Parser as CParser;
use log::debug;

use ether::compiler::{self, Compiler};
use ether::intern::{Interner, Keywords};
use ether::linker::Linker;
use ether::loader::Loader;
use ether::source::SourceMap;
use ether::typechecker::Typechecker;

#[derive(CParser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Source file to compile.
    file: Option<PathBuf>,

    /// Dump the parsed program before linking.
    #[arg(long)]
    print_ast: bool,
}

fn main() {
    simple_logger::init_with_level(log::Level::Warn).unwrap();
    let args = Cli::parse();

    let Some(file) = args.file else {
        fatal("no input files supplied");
    };

    let Ok(contents) = std::fs::read_to_string(&file) else {
        fatal(&format!("{}: no such file or directory", file.display()));
    };

    let mut interner = Interner::new();
    let kw = Keywords::new(&mut interner);
    let mut sources = SourceMap::new();

    let loader = Loader::new(&mut sources, &mut interner, &kw);
    let (mut program, front_end_error) = loader.run(file.clone(), contents);
    if front_end_error {
        abort();
    }

    if args.print_ast {
        println!("{program:#?}");
    }

    debug!("linking...");
    let (table, link_error) = Linker::new(&sources, &interner, &kw).run(&mut program);
    if link_error {
        abort();
    }

    debug!("type checking...");
    let checked = Typechecker::new(&sources, &interner, &kw, &table).run(&mut program);
    if checked.error_occurred {
        abort();
    }

    debug!("generating code...");
    let code = Compiler::new(&interner, &kw, &table).emit(&program);
    print!("{code}");

    if let Err(spawn_error) = compiler::invoke_c_compiler(&code, &file) {
        fatal(&format!("could not spawn C compiler: {spawn_error}"));
    }
}

fn fatal(msg: &str) -> ! {
    println!("ether: {msg}");
    exit(1);
}

fn abort() -> ! {
    println!("compilation aborted.");
    exit(1);
}

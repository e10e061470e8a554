//! Behavior of the `load` directive through the built binary.

use std::error::Error;
use std::path::PathBuf;
use std::process::{Command, Output};

fn compile(program: &str) -> Result<Output, Box<dyn Error>> {
    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/programs")
        .join(program);

    let workdir = std::env::temp_dir().join(format!(
        "ether-load-{}-{}",
        program.replace('.', "-"),
        std::process::id()
    ));
    std::fs::create_dir_all(&workdir)?;

    let output = Command::new(env!("CARGO_BIN_EXE_ether"))
        .arg(fixture)
        .current_dir(workdir)
        .output()?;
    Ok(output)
}

#[test]
fn load_merges_the_loaded_file() -> Result<(), Box<dyn Error>> {
    let output = compile("uses_load.eth")?;
    let stdout = std::str::from_utf8(&output.stdout)?;

    // declarations from both files end up in one translation unit
    assert!(stdout.contains("int helper(int x);"));
    assert!(stdout.contains("return ((x * 2));"));
    assert!(stdout.contains("return (helper(21));"));
    assert!(!stdout.contains("compilation aborted."));

    Ok(())
}

#[test]
fn load_missing_file_is_anchored_at_the_path() -> Result<(), Box<dyn Error>> {
    let output = compile("load_missing.eth")?;
    let stdout = std::str::from_utf8(&output.stdout)?;

    assert!(!output.status.success());
    assert!(stdout.contains("error: cannot find \"absent.eth\""));
    assert!(stdout.contains("compilation aborted."));

    Ok(())
}

#[test]
fn load_cycles_are_broken() -> Result<(), Box<dyn Error>> {
    let output = compile("cycle_main.eth")?;
    let stdout = std::str::from_utf8(&output.stdout)?;

    // each file is loaded exactly once
    assert_eq!(stdout.matches("int a_fn();").count(), 1);
    assert_eq!(stdout.matches("int b_fn();").count(), 1);
    assert!(!stdout.contains("compilation aborted."));

    Ok(())
}

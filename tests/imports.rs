//! Multi-file programs over the fixture files in `tests/programs/`.

use std::path::Path;

use anyhow::{Context, Result};
use lispcalc::resolver::Resolver;
use lispcalc::value::Value;
use lispcalc::{compiler, run_file, vm};

fn run_fixture(name: &str) -> Result<Value> {
    let path = Path::new("tests/programs").join(name);
    let mut out = Vec::new();
    run_file(&path, Vec::new(), &mut out)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("running {name}"))
}

#[test]
fn unqualified_import_exposes_functions_and_globals() -> Result<()> {
    assert_eq!(run_fixture("entry_unqualified.lc")?, Value::Num(49.0));
    Ok(())
}

#[test]
fn qualified_import_routes_through_the_alias() -> Result<()> {
    assert_eq!(run_fixture("entry_qualified.lc")?, Value::Num(10.0));
    Ok(())
}

#[test]
fn imports_follow_transitively() -> Result<()> {
    assert_eq!(run_fixture("entry_chain.lc")?, Value::Num(8.0));
    Ok(())
}

#[test]
fn import_cycles_terminate() -> Result<()> {
    assert_eq!(run_fixture("cycle_a.lc")?, Value::Num(12.0));
    Ok(())
}

#[test]
fn main_in_the_entry_file_receives_program_args() -> Result<()> {
    let path = Path::new("tests/programs/entry_main.lc");
    let mut out = Vec::new();
    let value = run_file(
        path,
        vec!["one".to_string(), "two".to_string()],
        &mut out,
    )
    .map_err(|err| anyhow::anyhow!("{err}"))?;
    assert_eq!(value, Value::Num(9.0));
    Ok(())
}

#[test]
fn stdlib_directory_is_the_fallback_search_path() -> Result<()> {
    let resolved = Resolver::with_stdlib_dir("tests/programs")
        .resolve_source("(import \"math_lib.lc\")(double 4)", Path::new("<inline>"))
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    let program = compiler::compile_asts(&resolved.asts, resolved.entry_file.clone())
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    let mut out = Vec::new();
    let value = vm::eval(&program, Vec::new(), &mut out).map_err(|err| anyhow::anyhow!("{err}"))?;
    assert_eq!(value, Value::Num(8.0));
    Ok(())
}

#[test]
fn qualified_function_must_exist_in_the_import() {
    let source = "(import \"math_lib.lc\" m)(m.missing 1)";
    let err = Resolver::new()
        .resolve_source(source, Path::new("tests/programs/virtual.lc"))
        .expect_err("should fail");
    assert!(err.to_string().contains("'missing' not found in import 'm'"));
}

#[test]
fn unqualified_names_do_not_reach_qualified_imports() {
    let source = "(import \"math_lib.lc\" m)(double 1)";
    let resolved = Resolver::new()
        .resolve_source(source, Path::new("tests/programs/virtual.lc"))
        .expect("resolve should succeed");
    // `double` stays unresolved, so compilation reports it unknown.
    let err = compiler::compile_asts(&resolved.asts, resolved.entry_file.clone())
        .expect_err("should fail");
    assert!(err.message.contains("Unknown identifier double"));
}

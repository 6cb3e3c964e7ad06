//! `lispcalc` — a bytecode toolchain for a small Lisp-style expression
//! language.
//!
//! Pipeline: `lexer` and `parser` turn source text into a parenthesized
//! tree; `ast` classifies it into expressions and statements; `resolver`
//! follows imports and binds function references; `compiler` lowers the
//! combined AST into bytecode frames; `vm` executes them against a shared
//! global environment and returns a single [`value::Value`].

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod token;
pub mod value;
pub mod vm;

use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::AstResult;
use crate::ast::builder::AstBuilder;
use crate::bytecode::CompiledProgram;
use crate::resolver::Resolver;
use crate::value::Value;

/// Any failure the pipeline can surface, one variant per stage.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Ast(#[from] ast::AstError),
    #[error(transparent)]
    Resolve(#[from] resolver::ResolveError),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Runtime(#[from] vm::RuntimeError),
}

/// Tokenizes, parses and classifies one file's source without following
/// imports.
pub fn build_ast(source: &str, file_name: &str) -> Result<AstResult, Error> {
    let tokens = lexer::tokenize(source)?;
    let tree = parser::parse_tokens(tokens)?;
    let result = AstBuilder::new().build_program(&tree, Rc::from(file_name))?;
    Ok(result)
}

/// Compiles source text to an executable program. Imports resolve relative
/// to the current directory.
pub fn compile_source(source: &str) -> Result<CompiledProgram, Error> {
    let resolved = Resolver::new().resolve_source(source, Path::new("<source>"))?;
    let program = compiler::compile_asts(&resolved.asts, resolved.entry_file.clone())?;
    Ok(program)
}

/// Compiles and runs source text; program output is written to `out`.
pub fn run_source(
    source: &str,
    program_args: Vec<String>,
    out: &mut dyn Write,
) -> Result<Value, Error> {
    let program = compile_source(source)?;
    let value = vm::eval(&program, program_args, out)?;
    Ok(value)
}

/// Compiles and runs the program rooted at `path`, following its imports.
pub fn run_file(
    path: &Path,
    program_args: Vec<String>,
    out: &mut dyn Write,
) -> Result<Value, Error> {
    let resolved = Resolver::new().resolve_file(path)?;
    let program = compiler::compile_asts(&resolved.asts, resolved.entry_file.clone())?;
    let value = vm::eval(&program, program_args, out)?;
    Ok(value)
}

//! Multi-file resolution: follows `import` statements, builds one combined
//! AST, and annotates every function application with its target.
//!
//! Import paths resolve against the importing file's directory first, then
//! the configured standard-library directory. Files are memoized on their
//! canonical path, which also terminates import cycles. The flattened output
//! orders imported files before their importers so imported globals exist by
//! the time the importer's root code runs.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error as ThisError;

use crate::Error;
use crate::ast::builder::AstBuilder;
use crate::ast::{Ast, AstNode, Expr, Stmt};
use crate::builtins::Builtin;
use crate::lexer::tokenize;
use crate::parser::parse_tokens;
use crate::token::Span;

#[derive(Debug, ThisError)]
pub enum ResolveError {
    #[error("{span}: Could not resolve import '{path}'")]
    ImportNotFound { path: String, span: Span },
    #[error("Failed to read {path}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{span}: Unknown import qualifier '{qualifier}'")]
    UnknownQualifier { qualifier: String, span: Span },
    #[error("{span}: Function '{name}' not found in import '{qualifier}'")]
    UnknownQualifiedFunction {
        qualifier: String,
        name: String,
        span: Span,
    },
}

/// The flattened program handed to the compiler.
#[derive(Debug, Clone)]
pub struct ResolvedProgram {
    pub asts: Vec<Ast>,
    pub entry_file: Rc<str>,
}

struct FileUnit {
    path: Rc<str>,
    dir: PathBuf,
    asts: Vec<Ast>,
    functions: HashSet<String>,
    imports: Vec<BoundImport>,
}

struct BoundImport {
    qualifier: Option<String>,
    target: usize,
}

pub struct Resolver {
    stdlib_dir: Option<PathBuf>,
    units: Vec<FileUnit>,
    seen: HashMap<PathBuf, usize>,
    /// Unit indices in dependency-first order.
    order: Vec<usize>,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            stdlib_dir: None,
            units: Vec::new(),
            seen: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn with_stdlib_dir(stdlib_dir: impl Into<PathBuf>) -> Self {
        Self {
            stdlib_dir: Some(stdlib_dir.into()),
            ..Self::new()
        }
    }

    /// Resolves the program rooted at the given file on disk.
    pub fn resolve_file(mut self, path: &Path) -> Result<ResolvedProgram, Error> {
        let code = read_source(path)?;
        let entry = self.build_unit(&code, path, fs::canonicalize(path).ok())?;
        self.finish(entry)
    }

    /// Resolves a program supplied as source text. `path` names the code in
    /// errors and is the base directory for its imports.
    pub fn resolve_source(mut self, code: &str, path: &Path) -> Result<ResolvedProgram, Error> {
        let entry = self.build_unit(code, path, fs::canonicalize(path).ok())?;
        self.finish(entry)
    }

    fn finish(mut self, entry: usize) -> Result<ResolvedProgram, Error> {
        self.annotate_units()?;
        let entry_file = self.units[entry].path.clone();
        let mut asts = Vec::new();
        for &unit in &self.order {
            asts.append(&mut self.units[unit].asts);
        }
        Ok(ResolvedProgram { asts, entry_file })
    }

    /// Parses and builds one file, registering it before its imports are
    /// followed so cyclic imports terminate.
    fn build_unit(
        &mut self,
        code: &str,
        path: &Path,
        canonical: Option<PathBuf>,
    ) -> Result<usize, Error> {
        let display: Rc<str> = Rc::from(path.display().to_string().as_str());
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let tokens = tokenize(code)?;
        let tree = parse_tokens(tokens)?;
        let mut builder = AstBuilder::new();
        let result = builder.build_program(&tree, display.clone())?;

        let unit = self.units.len();
        self.units.push(FileUnit {
            path: display,
            dir,
            asts: result.asts,
            functions: builder.function_names().clone(),
            imports: Vec::new(),
        });
        if let Some(canonical) = canonical {
            self.seen.insert(canonical, unit);
        }

        for import in &result.imports {
            let Some(candidate) = self.locate_import(unit, &import.path) else {
                return Err(ResolveError::ImportNotFound {
                    path: import.path.clone(),
                    span: import.span,
                }
                .into());
            };
            let canonical = fs::canonicalize(&candidate).unwrap_or_else(|_| candidate.clone());
            let target = match self.seen.get(&canonical) {
                Some(&target) => target,
                None => {
                    let code = read_source(&candidate)?;
                    self.build_unit(&code, &candidate, Some(canonical))?
                }
            };
            self.units[unit].imports.push(BoundImport {
                qualifier: import.qualifier.clone(),
                target,
            });
        }

        self.order.push(unit);
        Ok(unit)
    }

    /// First match wins: the importing file's directory, then the standard
    /// library directory.
    fn locate_import(&self, unit: usize, import_path: &str) -> Option<PathBuf> {
        let local = self.units[unit].dir.join(import_path);
        if local.is_file() {
            return Some(local);
        }
        let stdlib = self.stdlib_dir.as_ref()?.join(import_path);
        if stdlib.is_file() {
            return Some(stdlib);
        }
        None
    }

    fn annotate_units(&mut self) -> Result<(), Error> {
        for unit in 0..self.units.len() {
            let mut asts = std::mem::take(&mut self.units[unit].asts);
            for ast in &mut asts {
                self.annotate_ast(unit, ast)?;
            }
            self.units[unit].asts = asts;
        }
        Ok(())
    }

    fn annotate_ast(&self, unit: usize, ast: &mut Ast) -> Result<(), Error> {
        match &mut ast.node {
            AstNode::Expression(expr) => self.annotate_expr(unit, expr),
            AstNode::Statement(stmt) => self.annotate_stmt(unit, stmt),
        }
    }

    fn annotate_stmt(&self, unit: usize, stmt: &mut Stmt) -> Result<(), Error> {
        match stmt {
            Stmt::VarDef { value, .. } | Stmt::StructFieldAssign { value, .. } => {
                self.annotate_expr(unit, value)
            }
            Stmt::FuncDef { body, .. } => self.annotate_body(unit, body),
            Stmt::While {
                condition, body, ..
            } => {
                self.annotate_expr(unit, condition)?;
                self.annotate_body(unit, body)
            }
            Stmt::ReturnValue { value, .. } => self.annotate_expr(unit, value),
            Stmt::Import { .. } | Stmt::StructDef { .. } | Stmt::ReturnVoid { .. } => Ok(()),
        }
    }

    fn annotate_body(&self, unit: usize, body: &mut [Ast]) -> Result<(), Error> {
        for item in body {
            self.annotate_ast(unit, item)?;
        }
        Ok(())
    }

    fn annotate_expr(&self, unit: usize, expr: &mut Expr) -> Result<(), Error> {
        match expr {
            Expr::Number { .. }
            | Expr::Str { .. }
            | Expr::Bool { .. }
            | Expr::Null { .. }
            | Expr::VarUse { .. } => Ok(()),
            Expr::List { items, .. } => {
                for item in items {
                    self.annotate_expr(unit, item)?;
                }
                Ok(())
            }
            Expr::ClosureApp { callee, args, .. } => {
                for arg in args.iter_mut() {
                    self.annotate_expr(unit, arg)?;
                }
                self.annotate_expr(unit, callee)
            }
            Expr::ClosureDef { body, .. } => self.annotate_body(unit, body),
            Expr::IfElse {
                condition,
                if_branch,
                else_branch,
                ..
            } => {
                self.annotate_expr(unit, condition)?;
                self.annotate_body(unit, if_branch)?;
                self.annotate_body(unit, else_branch)
            }
            Expr::IfOnly {
                condition,
                if_branch,
                ..
            } => {
                self.annotate_expr(unit, condition)?;
                self.annotate_body(unit, if_branch)
            }
            Expr::StructCtor { fields, .. } => {
                for (_, value) in fields {
                    self.annotate_expr(unit, value)?;
                }
                Ok(())
            }
            Expr::StructAccess { subject, .. } => self.annotate_expr(unit, subject),
            Expr::FunctionApp {
                name,
                args,
                qualifier,
                resolved_file,
                is_builtin,
                span,
            } => {
                for arg in args.iter_mut() {
                    self.annotate_expr(unit, arg)?;
                }
                self.annotate_reference(unit, name, qualifier.as_deref(), resolved_file, is_builtin, *span)
            }
        }
    }

    fn annotate_reference(
        &self,
        unit: usize,
        name: &str,
        qualifier: Option<&str>,
        resolved_file: &mut Option<Rc<str>>,
        is_builtin: &mut bool,
        span: Span,
    ) -> Result<(), Error> {
        let current = &self.units[unit];
        if let Some(qualifier) = qualifier {
            let import = current
                .imports
                .iter()
                .find(|import| import.qualifier.as_deref() == Some(qualifier))
                .ok_or_else(|| ResolveError::UnknownQualifier {
                    qualifier: qualifier.to_string(),
                    span,
                })?;
            let target = &self.units[import.target];
            if !target.functions.contains(name) {
                return Err(ResolveError::UnknownQualifiedFunction {
                    qualifier: qualifier.to_string(),
                    name: name.to_string(),
                    span,
                }
                .into());
            }
            *resolved_file = Some(target.path.clone());
            return Ok(());
        }

        if Builtin::from_name(name).is_some() {
            *is_builtin = true;
            return Ok(());
        }
        if current.functions.contains(name) {
            *resolved_file = Some(current.path.clone());
            return Ok(());
        }
        for import in &current.imports {
            if import.qualifier.is_none() && self.units[import.target].functions.contains(name) {
                *resolved_file = Some(self.units[import.target].path.clone());
                return Ok(());
            }
        }
        // Unresolved is not an error: the name may be a local variable or a
        // closure at compile time.
        Ok(())
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn read_source(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|source| {
        ResolveError::ReadFile {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}

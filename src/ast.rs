//! Classified abstract syntax tree shared by the resolver and the compiler.
//!
//! The parser produces a uniform parenthesized tree; the builder in
//! [`builder`] classifies each top-level form into an expression or a
//! statement, hoists function names, and collects imports.

pub mod builder;

use std::rc::Rc;

use thiserror::Error;

use crate::token::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number {
        value: f64,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    List {
        items: Vec<Expr>,
        span: Span,
    },
    VarUse {
        name: String,
        span: Span,
    },
    FunctionApp {
        name: String,
        args: Vec<Expr>,
        /// Import alias for `alias.name` references.
        qualifier: Option<String>,
        /// Filled in by the resolver: the file that declares the target.
        resolved_file: Option<Rc<str>>,
        /// Filled in by the resolver when `name` addresses a builtin.
        is_builtin: bool,
        span: Span,
    },
    ClosureApp {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    ClosureDef {
        params: Vec<String>,
        body: Vec<Ast>,
        span: Span,
    },
    IfElse {
        condition: Box<Expr>,
        if_branch: Vec<Ast>,
        else_branch: Vec<Ast>,
        span: Span,
    },
    IfOnly {
        condition: Box<Expr>,
        if_branch: Vec<Ast>,
        span: Span,
    },
    StructCtor {
        type_name: String,
        /// Field initializers in written order.
        fields: Vec<(String, Expr)>,
        span: Span,
    },
    StructAccess {
        subject: Box<Expr>,
        field: String,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number { span, .. }
            | Expr::Str { span, .. }
            | Expr::Bool { span, .. }
            | Expr::Null { span }
            | Expr::List { span, .. }
            | Expr::VarUse { span, .. }
            | Expr::FunctionApp { span, .. }
            | Expr::ClosureApp { span, .. }
            | Expr::ClosureDef { span, .. }
            | Expr::IfElse { span, .. }
            | Expr::IfOnly { span, .. }
            | Expr::StructCtor { span, .. }
            | Expr::StructAccess { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDef {
        name: String,
        value: Expr,
        span: Span,
    },
    FuncDef {
        name: String,
        params: Vec<String>,
        body: Vec<Ast>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Vec<Ast>,
        span: Span,
    },
    /// Placeholder left where an import statement stood; the import itself
    /// lives in [`AstResult::imports`].
    Import {
        span: Span,
    },
    StructDef {
        name: String,
        fields: Vec<String>,
        span: Span,
    },
    StructFieldAssign {
        target: String,
        field: String,
        value: Expr,
        span: Span,
    },
    ReturnValue {
        value: Expr,
        span: Span,
    },
    ReturnVoid {
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDef { span, .. }
            | Stmt::FuncDef { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Import { span }
            | Stmt::StructDef { span, .. }
            | Stmt::StructFieldAssign { span, .. }
            | Stmt::ReturnValue { span, .. }
            | Stmt::ReturnVoid { span } => *span,
        }
    }
}

/// An AST item: either an expression or a statement, tagged with the file it
/// was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub node: AstNode,
    pub file: Rc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Expression(Expr),
    Statement(Stmt),
}

/// One `import` entry collected from a file's top level.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub qualifier: Option<String>,
    pub span: Span,
}

/// Result of building one file: its classified items plus the imports to
/// follow.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AstResult {
    pub asts: Vec<Ast>,
    pub imports: Vec<Import>,
}

/// Malformed special forms, nested function declarations, duplicate names.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{span}: {message}")]
pub struct AstError {
    pub span: Span,
    pub message: String,
    pub detail: Option<String>,
}

impl AstError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

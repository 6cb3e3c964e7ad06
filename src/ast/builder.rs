//! Turns the parenthesized parse tree into the classified AST.
//!
//! A parenthesized form whose head literal is `def`, `defun`, `while`,
//! `import`, `defstruct` or `return` becomes a statement; everything else is
//! an expression. Function names are hoisted before the ordinary walk so a
//! call may precede its function's declaration in the file.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{Ast, AstError, AstNode, AstResult, Expr, Import, Stmt};
use crate::parser::{Node, NodeKind};

const STATEMENT_HEADS: [&str; 6] = ["def", "defun", "while", "import", "defstruct", "return"];

pub struct AstBuilder {
    function_names: HashSet<String>,
    /// Set by a REPL host so a function may be redefined in the same session.
    pub allow_function_redeclaration: bool,
    file: Rc<str>,
    imports: Vec<Import>,
    body_depth: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self {
            function_names: HashSet::new(),
            allow_function_redeclaration: false,
            file: Rc::from(""),
            imports: Vec::new(),
            body_depth: 0,
        }
    }

    pub fn function_names(&self) -> &HashSet<String> {
        &self.function_names
    }

    /// Builds the AST for one file from its Program parse node.
    pub fn build_program(&mut self, program: &Node, file: Rc<str>) -> Result<AstResult, AstError> {
        self.file = file;
        self.imports = Vec::new();
        self.body_depth = 0;
        self.hoist_functions(program)?;

        let mut asts = Vec::new();
        for child in &program.children {
            asts.push(self.build_item(child)?);
        }
        Ok(AstResult {
            asts,
            imports: std::mem::take(&mut self.imports),
        })
    }

    /// Registers every top-level `defun` name before the walk, so calls in
    /// earlier statements can refer to later definitions.
    fn hoist_functions(&mut self, program: &Node) -> Result<(), AstError> {
        for child in &program.children {
            if nested_literal_value(child) != Some("defun") {
                continue;
            }
            let name = match child
                .children
                .get(1)
                .and_then(single_nested)
                .filter(|node| node.kind == NodeKind::Literal)
            {
                Some(node) => node.data.clone(),
                // Malformed declarations are reported by the ordinary walk.
                None => continue,
            };
            if !self.function_names.insert(name.clone()) && !self.allow_function_redeclaration {
                return Err(AstError::new(
                    child.span,
                    format!("Duplicate declaration of function {name}"),
                ));
            }
        }
        Ok(())
    }

    fn build_item(&mut self, node: &Node) -> Result<Ast, AstError> {
        let item = match nested_literal_value(node) {
            Some(head) if STATEMENT_HEADS.contains(&head) => {
                AstNode::Statement(self.create_statement(node, head)?)
            }
            _ => AstNode::Expression(self.create_expression(node)?),
        };
        Ok(Ast {
            node: item,
            file: self.file.clone(),
        })
    }

    fn create_expression(&mut self, node: &Node) -> Result<Expr, AstError> {
        match node.kind {
            NodeKind::Number => {
                let value: f64 = node.data.parse().map_err(|_| {
                    AstError::new(node.span, format!("Failed to parse `{}` as float", node.data))
                })?;
                Ok(Expr::Number {
                    value,
                    span: node.span,
                })
            }
            NodeKind::Bool => Ok(Expr::Bool {
                value: node.data == "true",
                span: node.span,
            }),
            NodeKind::Null => Ok(Expr::Null { span: node.span }),
            NodeKind::String => Ok(Expr::Str {
                value: node.data.clone(),
                span: node.span,
            }),
            NodeKind::Literal => Ok(Expr::VarUse {
                name: node.data.clone(),
                span: node.span,
            }),
            NodeKind::QualifiedLiteral => Ok(Expr::FunctionApp {
                name: node.children[1].data.clone(),
                args: Vec::new(),
                qualifier: Some(node.children[0].data.clone()),
                resolved_file: None,
                is_builtin: false,
                span: node.span,
            }),
            NodeKind::Accessor => Ok(Expr::StructAccess {
                subject: Box::new(Expr::VarUse {
                    name: node.children[0].data.clone(),
                    span: node.children[0].span,
                }),
                field: node.children[1].data.clone(),
                span: node.span,
            }),
            NodeKind::AccessorOp => Ok(Expr::StructAccess {
                subject: Box::new(self.create_expression(&node.children[1])?),
                field: node.children[0].data.clone(),
                span: node.span,
            }),
            NodeKind::Expression => self.create_compound_expression(node),
            NodeKind::Program => Err(AstError::new(node.span, "Parse error")
                .with_detail("unexpected nested program node")),
        }
    }

    fn create_compound_expression(&mut self, node: &Node) -> Result<Expr, AstError> {
        if node.children.is_empty() {
            return Err(AstError::new(node.span, "Parse error")
                .with_detail("Expression must have non-zero children"));
        }

        if let Some(head) = first_nested_single(node) {
            match head.kind {
                NodeKind::Literal => {
                    let head_data = head.data.clone();
                    return match head_data.as_str() {
                        "if" => self.create_if(node),
                        "list" => self.create_list(node),
                        "lambda" => self.create_closure(node),
                        "struct" => self.create_struct_ctor(node),
                        // Force application of a closure value.
                        "funcall" => self.create_closure_app(&node.children[1..], node.span),
                        _ => self.create_function_app(node, head_data, None),
                    };
                }
                NodeKind::QualifiedLiteral => {
                    let name = head.children[1].data.clone();
                    let qualifier = head.children[0].data.clone();
                    return self.create_function_app(node, name, Some(qualifier));
                }
                _ => {}
            }
        }

        if node.children.len() == 1 {
            return self.create_expression(&node.children[0]);
        }
        self.create_closure_app(&node.children, node.span)
    }

    fn create_list(&mut self, node: &Node) -> Result<Expr, AstError> {
        let mut items = Vec::with_capacity(node.children.len() - 1);
        for item in &node.children[1..] {
            items.push(self.create_expression(item)?);
        }
        Ok(Expr::List {
            items,
            span: node.span,
        })
    }

    fn create_if(&mut self, node: &Node) -> Result<Expr, AstError> {
        if node.children.len() != 3 && node.children.len() != 4 {
            return Err(AstError::new(node.span, "Syntax error for if").with_detail(format!(
                "Expected 3 or 4 children for if, got {}",
                node.children.len()
            )));
        }
        let condition = Box::new(self.create_expression(&node.children[1])?);
        let if_branch = self.create_branch_body(&node.children[2])?;
        if node.children.len() == 4 {
            let else_branch = self.create_branch_body(&node.children[3])?;
            Ok(Expr::IfElse {
                condition,
                if_branch,
                else_branch,
                span: node.span,
            })
        } else {
            Ok(Expr::IfOnly {
                condition,
                if_branch,
                span: node.span,
            })
        }
    }

    /// An `if` branch is either one direct expression, e.g. `(+ 10 4)`, or a
    /// parenthesized block of forms.
    fn create_branch_body(&mut self, node: &Node) -> Result<Vec<Ast>, AstError> {
        self.body_depth += 1;
        let result = self.branch_body_inner(node);
        self.body_depth -= 1;
        result
    }

    fn branch_body_inner(&mut self, node: &Node) -> Result<Vec<Ast>, AstError> {
        let is_single_expression = node
            .children
            .first()
            .filter(|first| first.children.len() == 1)
            .is_some_and(|first| first.children[0].kind != NodeKind::Expression);
        if is_single_expression {
            return Ok(vec![self.build_item(node)?]);
        }
        node.children
            .iter()
            .map(|child| self.build_item(child))
            .collect()
    }

    /// A function, closure or while body allows one direct value, e.g.
    /// `(defun f () 1)`; anything else must be its own parenthesized form.
    fn create_function_body(&mut self, body_nodes: &[Node]) -> Result<Vec<Ast>, AstError> {
        self.body_depth += 1;
        let result = self.function_body_inner(body_nodes);
        self.body_depth -= 1;
        result
    }

    fn function_body_inner(&mut self, body_nodes: &[Node]) -> Result<Vec<Ast>, AstError> {
        let mut body = Vec::with_capacity(body_nodes.len());
        for node in body_nodes {
            if body_nodes.len() > 1
                && node.children.len() == 1
                && node.children[0].kind != NodeKind::Expression
            {
                return Err(AstError::new(node.span, "Syntax error")
                    .with_detail("Body must be contained in an expression"));
            }
            body.push(self.build_item(node)?);
        }
        Ok(body)
    }

    fn create_closure_app(&mut self, parts: &[Node], span: crate::token::Span) -> Result<Expr, AstError> {
        let callee = match parts.first() {
            Some(first) => self.create_expression(first)?,
            None => {
                return Err(AstError::new(span, "Syntax error")
                    .with_detail("Closure application must have a value, got 0-length s-expr"));
            }
        };
        let mut args = Vec::with_capacity(parts.len() - 1);
        for arg in &parts[1..] {
            args.push(self.create_expression(arg)?);
        }
        Ok(Expr::ClosureApp {
            callee: Box::new(callee),
            args,
            span,
        })
    }

    fn create_function_app(
        &mut self,
        node: &Node,
        name: String,
        qualifier: Option<String>,
    ) -> Result<Expr, AstError> {
        let mut args = Vec::with_capacity(node.children.len() - 1);
        for arg in &node.children[1..] {
            args.push(self.create_expression(arg)?);
        }
        Ok(Expr::FunctionApp {
            name,
            args,
            qualifier,
            resolved_file: None,
            is_builtin: false,
            span: node.span,
        })
    }

    fn create_closure(&mut self, node: &Node) -> Result<Expr, AstError> {
        if node.children.len() < 3 {
            return Err(
                AstError::new(node.span, "Syntax error whilst declaring closure").with_detail(
                    format!("Expected at least 3 child nodes, got {}", node.children.len()),
                ),
            );
        }
        let params = self.parameter_names(&node.children[1])?;
        let body = self.create_function_body(&node.children[2..])?;
        Ok(Expr::ClosureDef {
            params,
            body,
            span: node.span,
        })
    }

    fn create_struct_ctor(&mut self, node: &Node) -> Result<Expr, AstError> {
        let type_name = match node.children.get(1).and_then(single_nested) {
            Some(name) if name.kind == NodeKind::Literal => name.data.clone(),
            _ => {
                return Err(AstError::new(
                    node.span,
                    "Struct instantiation should take form (struct <name> (<field> <value>) ...)",
                ));
            }
        };
        let mut fields: Vec<(String, Expr)> = Vec::new();
        for pair in &node.children[2..] {
            if pair.children.len() != 2 {
                return Err(AstError::new(pair.span, "Malformed struct field initializer")
                    .with_detail("expected (<field> <value>)"));
            }
            let field = match single_nested(&pair.children[0]) {
                Some(name) if name.kind == NodeKind::Literal => name.data.clone(),
                _ => {
                    return Err(AstError::new(
                        pair.children[0].span,
                        "Struct field name must be an identifier",
                    ));
                }
            };
            if fields.iter().any(|(existing, _)| *existing == field) {
                return Err(AstError::new(
                    pair.span,
                    format!("Duplicate initializer for struct field {field}"),
                ));
            }
            let value = self.create_expression(&pair.children[1])?;
            fields.push((field, value));
        }
        Ok(Expr::StructCtor {
            type_name,
            fields,
            span: node.span,
        })
    }

    fn create_statement(&mut self, node: &Node, head: &str) -> Result<Stmt, AstError> {
        match head {
            "def" => self.create_def(node),
            "defun" => self.create_defun(node),
            "while" => self.create_while(node),
            "import" => self.create_import(node),
            "defstruct" => self.create_defstruct(node),
            "return" => self.create_return(node),
            _ => Err(AstError::new(node.span, "Parse error")
                .with_detail(format!("unknown statement head {head}"))),
        }
    }

    fn create_def(&mut self, node: &Node) -> Result<Stmt, AstError> {
        if node.children.len() != 3 {
            return Err(AstError::new(
                node.span,
                "Variable declaration should take form (def <name> <value>)",
            )
            .with_detail(format!(
                "expected 3 expression children, got {}",
                node.children.len()
            )));
        }
        let name_node = match single_nested(&node.children[1]) {
            Some(inner) => inner,
            None => {
                return Err(AstError::new(
                    node.children[1].span,
                    "Variable name must be an identifier",
                ));
            }
        };
        let value = self.create_expression(&node.children[2]).map_err(|err| {
            AstError::new(node.children[2].span, "Invalid variable assignment")
                .with_detail(err.to_string())
        })?;
        match name_node.kind {
            NodeKind::Literal => Ok(Stmt::VarDef {
                name: name_node.data.clone(),
                value,
                span: node.span,
            }),
            // (def p:x value) assigns into a struct field.
            NodeKind::Accessor => Ok(Stmt::StructFieldAssign {
                target: name_node.children[0].data.clone(),
                field: name_node.children[1].data.clone(),
                value,
                span: node.span,
            }),
            _ => Err(AstError::new(
                node.children[1].span,
                "Variable name must be an identifier",
            )),
        }
    }

    fn create_defun(&mut self, node: &Node) -> Result<Stmt, AstError> {
        if self.body_depth > 0 {
            return Err(AstError::new(
                node.span,
                "Function declarations are only allowed at the top level of a file",
            )
            .with_detail("use a lambda for a nested function"));
        }
        if node.children.len() < 4 {
            return Err(AstError::new(
                node.span,
                "Function declaration should take form (defun <name> (<params>) <body>)",
            )
            .with_detail(format!("expected at least 4 children, got {}", node.children.len())));
        }
        let name = match node.children.get(1).and_then(single_nested) {
            Some(inner) if inner.kind == NodeKind::Literal => inner.data.clone(),
            _ => {
                return Err(AstError::new(
                    node.children[1].span,
                    "Function name must be an identifier",
                ));
            }
        };
        let params = self.parameter_names(&node.children[2])?;
        let body = self.create_function_body(&node.children[3..])?;
        Ok(Stmt::FuncDef {
            name,
            params,
            body,
            span: node.span,
        })
    }

    fn create_while(&mut self, node: &Node) -> Result<Stmt, AstError> {
        if node.children.len() < 3 {
            return Err(AstError::new(node.span, "Syntax error for while").with_detail(format!(
                "Expected at least 3 children for while, got {}",
                node.children.len()
            )));
        }
        let condition = self.create_expression(&node.children[1])?;
        let body = self.create_function_body(&node.children[2..])?;
        Ok(Stmt::While {
            condition,
            body,
            span: node.span,
        })
    }

    fn create_import(&mut self, node: &Node) -> Result<Stmt, AstError> {
        if self.body_depth > 0 {
            return Err(AstError::new(
                node.span,
                "Imports are only allowed at the top level of a file",
            ));
        }
        if node.children.len() != 2 && node.children.len() != 3 {
            return Err(AstError::new(
                node.span,
                "Import should take form (import \"<path>\" <qualifier>?)",
            ));
        }
        let path = match node.children.get(1).and_then(single_nested) {
            Some(inner) if inner.kind == NodeKind::String => inner.data.clone(),
            _ => {
                return Err(AstError::new(
                    node.children[1].span,
                    "Import path must be a string",
                ));
            }
        };
        let qualifier = match node.children.get(2) {
            Some(qualifier_node) => match single_nested(qualifier_node) {
                Some(inner) if inner.kind == NodeKind::Literal => Some(inner.data.clone()),
                _ => {
                    return Err(AstError::new(
                        qualifier_node.span,
                        "Import qualifier must be an identifier",
                    ));
                }
            },
            None => None,
        };
        self.imports.push(Import {
            path,
            qualifier,
            span: node.span,
        });
        Ok(Stmt::Import { span: node.span })
    }

    fn create_defstruct(&mut self, node: &Node) -> Result<Stmt, AstError> {
        if node.children.len() < 3 {
            return Err(AstError::new(
                node.span,
                "Struct declaration should take form (defstruct <name> <field> ...)",
            )
            .with_detail(format!("expected at least 3 children, got {}", node.children.len())));
        }
        let name = match node.children.get(1).and_then(single_nested) {
            Some(inner) if inner.kind == NodeKind::Literal => inner.data.clone(),
            _ => {
                return Err(AstError::new(
                    node.children[1].span,
                    "Struct name must be an identifier",
                ));
            }
        };
        let mut fields: Vec<String> = Vec::with_capacity(node.children.len() - 2);
        for field_node in &node.children[2..] {
            let field = match single_nested(field_node) {
                Some(inner) if inner.kind == NodeKind::Literal => inner.data.clone(),
                _ => {
                    return Err(AstError::new(
                        field_node.span,
                        "Struct field name must be an identifier",
                    ));
                }
            };
            if fields.contains(&field) {
                return Err(AstError::new(
                    field_node.span,
                    format!("Duplicate field {field} in struct {name}"),
                ));
            }
            fields.push(field);
        }
        Ok(Stmt::StructDef {
            name,
            fields,
            span: node.span,
        })
    }

    fn create_return(&mut self, node: &Node) -> Result<Stmt, AstError> {
        match node.children.len() {
            1 => Ok(Stmt::ReturnVoid { span: node.span }),
            2 => Ok(Stmt::ReturnValue {
                value: self.create_expression(&node.children[1])?,
                span: node.span,
            }),
            count => Err(AstError::new(node.span, "Syntax error for return")
                .with_detail(format!("expected at most one value, got {}", count - 1))),
        }
    }

    fn parameter_names(&self, list: &Node) -> Result<Vec<String>, AstError> {
        let mut params = Vec::with_capacity(list.children.len());
        for param in &list.children {
            match single_nested(param) {
                Some(inner) if inner.kind == NodeKind::Literal => params.push(inner.data.clone()),
                _ => {
                    return Err(AstError::new(
                        param.span,
                        "Parameter name must be an identifier",
                    ));
                }
            }
        }
        Ok(params)
    }
}

impl Default for AstBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `Expr -> Expr -> Literal` is the common shape for special-form heads;
/// returns the literal's text when `node` starts with one.
fn nested_literal_value(node: &Node) -> Option<&str> {
    if node.kind != NodeKind::Expression {
        return None;
    }
    let head = first_nested_single(node)?;
    if head.kind == NodeKind::Literal {
        Some(&head.data)
    } else {
        None
    }
}

/// The single grandchild of `node`'s first child, when the first child is an
/// Expression wrapping exactly one node.
fn first_nested_single(node: &Node) -> Option<&Node> {
    let first = node.children.first()?;
    if first.kind == NodeKind::Expression && first.children.len() == 1 {
        Some(&first.children[0])
    } else {
        None
    }
}

/// The single child of an Expression node.
fn single_nested(node: &Node) -> Option<&Node> {
    if node.kind == NodeKind::Expression && node.children.len() == 1 {
        Some(&node.children[0])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn build(source: &str) -> AstResult {
        try_build(source).expect("build failed")
    }

    fn try_build(source: &str) -> Result<AstResult, AstError> {
        let tree = parse_tokens(tokenize(source).expect("tokenize failed")).expect("parse failed");
        AstBuilder::new().build_program(&tree, Rc::from("<test>"))
    }

    fn single_expr(source: &str) -> Expr {
        let result = build(source);
        assert_eq!(result.asts.len(), 1, "expected one item for {source}");
        match &result.asts[0].node {
            AstNode::Expression(expr) => expr.clone(),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    fn single_stmt(source: &str) -> Stmt {
        let result = build(source);
        assert_eq!(result.asts.len(), 1, "expected one item for {source}");
        match &result.asts[0].node {
            AstNode::Statement(stmt) => stmt.clone(),
            other => panic!("expected statement, got {other:?}"),
        }
    }

    #[test]
    fn classifies_literals() {
        assert!(matches!(single_expr("(5)"), Expr::Number { value, .. } if value == 5.0));
        assert!(matches!(single_expr("(-5.5)"), Expr::Number { value, .. } if value == -5.5));
        assert!(matches!(single_expr("(true)"), Expr::Bool { value: true, .. }));
        assert!(matches!(single_expr("(null)"), Expr::Null { .. }));
        assert!(
            matches!(single_expr("(\"hi\")"), Expr::Str { value, .. } if value == "hi")
        );
    }

    #[test]
    fn zero_arg_application_of_a_name_is_a_function_app() {
        match single_expr("(x)") {
            Expr::FunctionApp { name, args, .. } => {
                assert_eq!(name, "x");
                assert!(args.is_empty());
            }
            other => panic!("expected FunctionApp, got {other:?}"),
        }
    }

    #[test]
    fn builds_function_application() {
        match single_expr("(+ 1 2)") {
            Expr::FunctionApp {
                name,
                args,
                qualifier,
                ..
            } => {
                assert_eq!(name, "+");
                assert_eq!(args.len(), 2);
                assert!(qualifier.is_none());
            }
            other => panic!("expected FunctionApp, got {other:?}"),
        }
    }

    #[test]
    fn builds_qualified_application() {
        match single_expr("(m.f 1)") {
            Expr::FunctionApp {
                name, qualifier, ..
            } => {
                assert_eq!(name, "f");
                assert_eq!(qualifier.as_deref(), Some("m"));
            }
            other => panic!("expected FunctionApp, got {other:?}"),
        }
    }

    #[test]
    fn builds_list_literal() {
        match single_expr("(list 1 2 3)") {
            Expr::List { items, .. } => assert_eq!(items.len(), 3),
            other => panic!("expected List, got {other:?}"),
        }
    }

    #[test]
    fn builds_if_forms() {
        assert!(matches!(single_expr("(if true 4 2)"), Expr::IfElse { .. }));
        assert!(matches!(single_expr("(if true 4)"), Expr::IfOnly { .. }));
        let err = try_build("(if true)").expect_err("should fail");
        assert!(err.message.contains("if"));
    }

    #[test]
    fn builds_lambda_and_funcall() {
        match single_expr("(lambda (x y) (+ x y))") {
            Expr::ClosureDef { params, body, .. } => {
                assert_eq!(params, vec!["x".to_string(), "y".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected ClosureDef, got {other:?}"),
        }
        assert!(matches!(single_expr("(funcall f 1)"), Expr::ClosureApp { .. }));
    }

    #[test]
    fn non_literal_head_is_a_closure_application() {
        match single_expr("((lambda (x) x) 10)") {
            Expr::ClosureApp { callee, args, .. } => {
                assert!(matches!(*callee, Expr::ClosureDef { .. }));
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected ClosureApp, got {other:?}"),
        }
    }

    #[test]
    fn builds_var_def() {
        match single_stmt("(def x 10)") {
            Stmt::VarDef { name, value, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(value, Expr::Number { .. }));
            }
            other => panic!("expected VarDef, got {other:?}"),
        }
    }

    #[test]
    fn def_of_accessor_is_a_field_assignment() {
        match single_stmt("(def p:x 10)") {
            Stmt::StructFieldAssign { target, field, .. } => {
                assert_eq!(target, "p");
                assert_eq!(field, "x");
            }
            other => panic!("expected StructFieldAssign, got {other:?}"),
        }
    }

    #[test]
    fn builds_struct_forms() {
        match single_stmt("(defstruct point x y)") {
            Stmt::StructDef { name, fields, .. } => {
                assert_eq!(name, "point");
                assert_eq!(fields, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("expected StructDef, got {other:?}"),
        }
        match single_expr("(struct point (x 3) (y 4))") {
            Expr::StructCtor {
                type_name, fields, ..
            } => {
                assert_eq!(type_name, "point");
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0, "x");
            }
            other => panic!("expected StructCtor, got {other:?}"),
        }
        assert!(matches!(single_expr("(:x p)"), Expr::StructAccess { .. }));
        assert!(matches!(single_expr("p:x"), Expr::StructAccess { .. }));
    }

    #[test]
    fn rejects_duplicate_struct_fields() {
        let err = try_build("(defstruct point x x)").expect_err("should fail");
        assert!(err.message.contains("Duplicate field"));
    }

    #[test]
    fn collects_imports() {
        let result = build("(import \"lib.lc\")(import \"util.lc\" util)(+ 1 2)");
        assert_eq!(result.imports.len(), 2);
        assert_eq!(result.imports[0].path, "lib.lc");
        assert!(result.imports[0].qualifier.is_none());
        assert_eq!(result.imports[1].qualifier.as_deref(), Some("util"));
        // Statement positions remain as no-op markers.
        assert!(matches!(
            result.asts[0].node,
            AstNode::Statement(Stmt::Import { .. })
        ));
    }

    #[test]
    fn builds_while_and_return() {
        assert!(matches!(
            single_stmt("(while (> x 0) (def x (- x 1)))"),
            Stmt::While { .. }
        ));
        let result = build("(defun f () (return 5))");
        match &result.asts[0].node {
            AstNode::Statement(Stmt::FuncDef { body, .. }) => {
                assert!(matches!(
                    body[0].node,
                    AstNode::Statement(Stmt::ReturnValue { .. })
                ));
            }
            other => panic!("expected FuncDef, got {other:?}"),
        }
    }

    #[test]
    fn rejects_nested_function_declarations() {
        let err = try_build("(defun f () (defun g () 1))").expect_err("should fail");
        assert!(err.message.contains("top level"));
    }

    #[test]
    fn rejects_duplicate_functions_unless_allowed() {
        let source = "(defun f () 1)(defun f () 2)";
        let err = try_build(source).expect_err("should fail");
        assert!(err.message.contains("Duplicate declaration"));

        let tree = parse_tokens(tokenize(source).expect("tokenize failed")).expect("parse failed");
        let mut builder = AstBuilder::new();
        builder.allow_function_redeclaration = true;
        builder
            .build_program(&tree, Rc::from("<repl>"))
            .expect("redeclaration should be allowed");
    }

    #[test]
    fn function_names_are_hoisted() {
        let result = build("(f)(defun f () 1)");
        assert!(matches!(
            result.asts[0].node,
            AstNode::Expression(Expr::FunctionApp { .. })
        ));
    }

    #[test]
    fn multi_form_body_requires_parenthesized_forms() {
        let err = try_build("(defun f () 1 2)").expect_err("should fail");
        assert_eq!(
            err.detail.as_deref(),
            Some("Body must be contained in an expression")
        );
        // A single direct value is fine.
        build("(defun f () 1)");
    }

    #[test]
    fn builds_multi_statement_function_body() {
        let result = build("(defun f (x) (def y 10) (+ x y))");
        match &result.asts[0].node {
            AstNode::Statement(Stmt::FuncDef { body, params, .. }) => {
                assert_eq!(params, &vec!["x".to_string()]);
                assert_eq!(body.len(), 2);
                assert!(matches!(
                    body[0].node,
                    AstNode::Statement(Stmt::VarDef { .. })
                ));
            }
            other => panic!("expected FuncDef, got {other:?}"),
        }
    }

    #[test]
    fn if_branch_may_be_a_block() {
        let source = "(if (< 10 5) (+ 4 10) ((def x 10) (def y 20) (- x y)))";
        match single_expr(source) {
            Expr::IfElse { else_branch, .. } => assert_eq!(else_branch.len(), 3),
            other => panic!("expected IfElse, got {other:?}"),
        }
    }
}

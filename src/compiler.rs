//! Lowers the classified AST into bytecode frames.
//!
//! Compilation is two-pass: a hoisting walk over the top level reserves
//! function and struct indices so bodies can call forward; the main pass
//! then lowers global definitions, the `main` invocation (or the remaining
//! top-level forms) and every function body.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ast::{Ast, AstNode, Expr, Stmt};
use crate::builtins::Builtin;
use crate::bytecode::{CompiledProgram, Frame, Instruction, StructDecl};
use crate::token::Span;
use crate::value::{ClosureValue, Value};

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{file}:{span}: {message}")]
pub struct CompileError {
    pub file: Rc<str>,
    pub span: Span,
    pub message: String,
    pub detail: Option<String>,
}

impl CompileError {
    fn new(file: Rc<str>, span: Span, message: impl Into<String>) -> Self {
        Self {
            file,
            span,
            message: message.into(),
            detail: None,
        }
    }
}

type FunctionKey = (Rc<str>, String);

pub struct Compiler {
    globals: Vec<Value>,
    global_map: HashMap<String, usize>,
    functions: Vec<Frame>,
    function_map: HashMap<FunctionKey, usize>,
    function_names: Vec<String>,
    structs: Vec<Rc<StructDecl>>,
    struct_map: HashMap<String, usize>,
}

/// Compiles a flattened AST into an executable program. `entry_file` decides
/// where `main` is looked up.
pub fn compile_asts(asts: &[Ast], entry_file: Rc<str>) -> Result<CompiledProgram, CompileError> {
    Compiler::new().compile(asts, entry_file)
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            global_map: HashMap::new(),
            functions: Vec::new(),
            function_map: HashMap::new(),
            function_names: Vec::new(),
            structs: Vec::new(),
            struct_map: HashMap::new(),
        }
    }

    pub fn compile(
        mut self,
        asts: &[Ast],
        entry_file: Rc<str>,
    ) -> Result<CompiledProgram, CompileError> {
        let mut root = Frame::new(entry_file.clone());
        root.is_root = true;

        self.hoist(asts)?;

        // Global variable and function definitions compile first, in source
        // order, so main (or the trailing expressions) can see them all.
        for ast in asts {
            match &ast.node {
                AstNode::Statement(Stmt::FuncDef {
                    name, params, body, span,
                }) => {
                    self.compile_function(ast.file.clone(), name, params, body, span.start.line)?;
                }
                AstNode::Statement(stmt @ Stmt::VarDef { .. }) => {
                    self.compile_statement(stmt, &mut root)?;
                }
                _ => {}
            }
        }

        let main_key = (entry_file.clone(), "main".to_string());
        let main_index = self.function_map.get(&main_key).copied();
        if let Some(main_index) = main_index {
            let main_params = self.functions[main_index].params.len();
            if main_params > 1 {
                let span = asts
                    .iter()
                    .find_map(|ast| match &ast.node {
                        AstNode::Statement(Stmt::FuncDef { name, span, .. }) if name == "main" => {
                            Some(*span)
                        }
                        _ => None,
                    })
                    .unwrap_or_default();
                return Err(CompileError::new(
                    entry_file,
                    span,
                    "Main function must take zero or one argument",
                ));
            }
            if main_params == 1 {
                root.emit(Instruction::PushArgs, 0);
            }
            root.emit(Instruction::CallFunction(main_index), 0);
        } else {
            for ast in asts {
                match &ast.node {
                    AstNode::Expression(expr) => self.compile_expression(expr, &mut root)?,
                    AstNode::Statement(
                        Stmt::VarDef { .. } | Stmt::FuncDef { .. } | Stmt::StructDef { .. },
                    ) => {}
                    AstNode::Statement(stmt) => self.compile_statement(stmt, &mut root)?,
                }
            }
        }

        Ok(CompiledProgram {
            root,
            functions: self.functions.into_iter().map(Rc::new).collect(),
            function_names: self.function_names,
            globals: self.globals,
            global_map: self.global_map,
            structs: self.structs,
            struct_map: self.struct_map,
            main_index,
        })
    }

    /// Reserves indices for every top-level function and struct so calls may
    /// precede declarations.
    fn hoist(&mut self, asts: &[Ast]) -> Result<(), CompileError> {
        for ast in asts {
            match &ast.node {
                AstNode::Statement(Stmt::FuncDef { name, span: _, .. }) => {
                    let key = (ast.file.clone(), name.clone());
                    if !self.function_map.contains_key(&key) {
                        self.functions.push(Frame::new(ast.file.clone()));
                        self.function_map.insert(key, self.functions.len() - 1);
                        self.function_names.push(name.clone());
                    }
                }
                AstNode::Statement(Stmt::StructDef { name, fields, span }) => {
                    self.declare_struct(name, fields, *span, ast.file.clone())?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_struct(
        &mut self,
        name: &str,
        fields: &[String],
        span: Span,
        file: Rc<str>,
    ) -> Result<(), CompileError> {
        if self.struct_map.contains_key(name) {
            return Err(CompileError::new(
                file,
                span,
                format!("Duplicate declaration of struct {name}"),
            ));
        }
        self.structs.push(Rc::new(StructDecl {
            name: name.to_string(),
            field_names: fields.to_vec(),
        }));
        self.struct_map.insert(name.to_string(), self.structs.len() - 1);
        Ok(())
    }

    fn compile_block(&mut self, asts: &[Ast], frame: &mut Frame) -> Result<(), CompileError> {
        for ast in asts {
            match &ast.node {
                AstNode::Expression(expr) => self.compile_expression(expr, frame)?,
                AstNode::Statement(stmt) => self.compile_statement(stmt, frame)?,
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expr, frame: &mut Frame) -> Result<(), CompileError> {
        let line = expr.span().start.line;
        match expr {
            Expr::Number { value, .. } => self.emit_constant(frame, Value::Num(*value), line),
            Expr::Bool { value, .. } => self.emit_constant(frame, Value::Bool(*value), line),
            Expr::Str { value, .. } => self.emit_constant(frame, Value::Str(value.clone()), line),
            Expr::Null { .. } => self.emit_constant(frame, Value::Null, line),
            Expr::List { items, .. } => {
                for item in items {
                    self.compile_expression(item, frame)?;
                }
                frame.emit(Instruction::CreateList(items.len()), line);
            }
            Expr::VarUse { name, span } => {
                if let Some(&index) = frame.variable_map.get(name) {
                    frame.emit(Instruction::LoadVar(index), line);
                } else if let Some(&index) = self.global_map.get(name) {
                    frame.emit(Instruction::LoadGlobal(index), line);
                } else {
                    return Err(CompileError::new(
                        frame.file.clone(),
                        *span,
                        format!("Unknown variable {name}"),
                    ));
                }
            }
            Expr::IfElse {
                condition,
                if_branch,
                else_branch,
                ..
            } => {
                self.compile_expression(condition, frame)?;
                frame.emit(Instruction::CondJumpFalse(0), line);
                let cond_jump_index = frame.code.len() - 1;
                self.compile_block(if_branch, frame)?;
                frame.patch_jump(cond_jump_index, (frame.code.len() - cond_jump_index) as i32);
                frame.emit(Instruction::Jump(0), line);
                let if_jump_index = frame.code.len() - 1;
                self.compile_block(else_branch, frame)?;
                frame.patch_jump(if_jump_index, (frame.code.len() - (if_jump_index + 1)) as i32);
            }
            Expr::IfOnly {
                condition,
                if_branch,
                ..
            } => {
                self.compile_expression(condition, frame)?;
                frame.emit(Instruction::CondJumpFalse(0), line);
                let cond_jump_index = frame.code.len() - 1;
                self.compile_block(if_branch, frame)?;
                frame.patch_jump(cond_jump_index, (frame.code.len() - cond_jump_index) as i32);
                // The taken branch skips the null that stands in for the
                // missing else leg.
                frame.emit(Instruction::Jump(1), line);
                frame.emit(Instruction::StoreNull, line);
            }
            Expr::StructCtor {
                type_name,
                fields,
                span,
            } => self.compile_struct_ctor(type_name, fields, *span, frame)?,
            Expr::StructAccess { subject, field, .. } => {
                self.compile_expression(subject, frame)?;
                let name_index = frame.name_index(field);
                frame.emit(Instruction::StructFieldIndex(name_index), line);
                frame.emit(Instruction::GetStructField, line);
            }
            Expr::ClosureDef { params, body, span } => {
                self.compile_closure_def(params, body, *span, frame)?;
            }
            Expr::ClosureApp { callee, args, .. } => {
                for arg in args {
                    self.compile_expression(arg, frame)?;
                }
                self.compile_expression(callee, frame)?;
                frame.emit(Instruction::CallClosure, line);
            }
            Expr::FunctionApp {
                name,
                args,
                qualifier,
                resolved_file,
                span,
                ..
            } => {
                self.compile_function_app(
                    name,
                    args,
                    qualifier.as_deref(),
                    resolved_file.clone(),
                    *span,
                    frame,
                )?;
            }
        }
        Ok(())
    }

    fn emit_constant(&mut self, frame: &mut Frame, value: Value, line: u32) {
        let index = frame.add_constant(value);
        frame.emit(Instruction::LoadConst(index), line);
    }

    fn compile_function_app(
        &mut self,
        name: &str,
        args: &[Expr],
        qualifier: Option<&str>,
        resolved_file: Option<Rc<str>>,
        span: Span,
        frame: &mut Frame,
    ) -> Result<(), CompileError> {
        let line = span.start.line;
        for arg in args {
            self.compile_expression(arg, frame)?;
        }

        if qualifier.is_none() {
            if name == "+" {
                if args.len() != 2 {
                    return Err(CompileError::new(
                        frame.file.clone(),
                        span,
                        format!("Expected 2 arguments, got {}", args.len()),
                    ));
                }
                frame.emit(Instruction::Add, line);
                return Ok(());
            }
            if let Some(builtin) = Builtin::from_name(name) {
                if args.len() != builtin.arity() {
                    return Err(CompileError::new(
                        frame.file.clone(),
                        span,
                        format!("Expected {} arguments, got {}", builtin.arity(), args.len()),
                    ));
                }
                frame.emit(Instruction::CallBuiltin(builtin), line);
                return Ok(());
            }
            // A plain name with no arguments reads the variable; with
            // arguments the variable must hold a closure to apply.
            if let Some(&index) = frame.variable_map.get(name) {
                frame.emit(Instruction::LoadVar(index), line);
                if !args.is_empty() {
                    frame.emit(Instruction::CallClosure, line);
                }
                return Ok(());
            }
            if let Some(&index) = self.global_map.get(name) {
                frame.emit(Instruction::LoadGlobal(index), line);
                if !args.is_empty() {
                    frame.emit(Instruction::CallClosure, line);
                }
                return Ok(());
            }
        }

        let target_file = resolved_file.unwrap_or_else(|| frame.file.clone());
        let key = (target_file, name.to_string());
        if let Some(&index) = self.function_map.get(&key) {
            frame.emit(Instruction::CallFunction(index), line);
            return Ok(());
        }
        Err(CompileError::new(
            frame.file.clone(),
            span,
            format!("Unknown identifier {name}"),
        ))
    }

    fn compile_struct_ctor(
        &mut self,
        type_name: &str,
        fields: &[(String, Expr)],
        span: Span,
        frame: &mut Frame,
    ) -> Result<(), CompileError> {
        let line = span.start.line;
        let struct_index = match self.struct_map.get(type_name) {
            Some(&index) => index,
            None => {
                return Err(CompileError::new(
                    frame.file.clone(),
                    span,
                    format!("Use of undeclared struct {type_name}"),
                ));
            }
        };
        frame.emit(Instruction::CreateStruct(struct_index), line);
        let declared = self.structs[struct_index].field_names.clone();

        for (field, value) in fields {
            if !declared.contains(field) {
                return Err(CompileError::new(
                    frame.file.clone(),
                    value.span(),
                    format!("Struct has no field {field}"),
                ));
            }
        }
        // Fields initialize in declaration order; missing ones get null.
        for declared_field in &declared {
            let name_index = frame.name_index(declared_field);
            frame.emit(Instruction::StructFieldIndex(name_index), line);
            match fields.iter().find(|(field, _)| field == declared_field) {
                Some((_, value)) => self.compile_expression(value, frame)?,
                None => frame.emit(Instruction::StoreNull, line),
            }
            frame.emit(Instruction::SetStructField, line);
        }
        Ok(())
    }

    /// A closure frame clones the enclosing slot layout and reserves slots
    /// for every global; construction code then snapshots the current values
    /// into those slots. Slot order is captured locals, captured globals,
    /// then parameters and body locals.
    fn compile_closure_def(
        &mut self,
        params: &[String],
        body: &[Ast],
        span: Span,
        frame: &mut Frame,
    ) -> Result<(), CompileError> {
        let line = span.start.line;
        let mut closure_frame = Frame::new(frame.file.clone());
        closure_frame.variable_map = frame.variable_map.clone();
        closure_frame.variables = frame.variables.clone();
        for _ in &self.globals {
            closure_frame.variables.push(Value::Null);
        }
        for (global_name, &global_index) in &self.global_map {
            closure_frame
                .variable_map
                .insert(global_name.clone(), global_index + frame.variables.len());
        }

        // Arguments are popped right-to-left: the last one pushed lands in
        // the last parameter slot.
        for offset in 0..params.len() {
            let param = &params[params.len() - 1 - offset];
            closure_frame.variables.push(Value::Null);
            let slot = closure_frame.variables.len() - 1;
            closure_frame.variable_map.insert(param.clone(), slot);
            closure_frame.emit(Instruction::StoreVar(slot), line);
        }
        closure_frame.params = params.to_vec();
        self.compile_block(body, &mut closure_frame)?;

        let closure = Value::Closure(Rc::new(ClosureValue {
            params: params.to_vec(),
            frame: closure_frame,
        }));
        self.emit_constant(frame, closure, line);

        for source in 0..frame.variables.len() {
            frame.emit(
                Instruction::PushClosureVar {
                    src: source,
                    dst: source,
                },
                line,
            );
        }
        for global_index in 0..self.globals.len() {
            frame.emit(
                Instruction::PushGlobalClosureVar {
                    src: global_index,
                    dst: frame.variables.len() + global_index,
                },
                line,
            );
        }
        Ok(())
    }

    /// Builds one function's frame and installs it at the index the hoist
    /// pass reserved under `(file, name)`.
    fn compile_function(
        &mut self,
        file: Rc<str>,
        name: &str,
        params: &[String],
        body: &[Ast],
        line: u32,
    ) -> Result<(), CompileError> {
        let mut function_frame = Frame::new(file.clone());
        function_frame.function_name = name.to_string();
        function_frame.params = params.to_vec();
        for (position, param) in params.iter().enumerate() {
            function_frame.variable_map.insert(param.clone(), position);
            function_frame.variables.push(Value::Null);
            // Pop arguments into slots right-to-left.
            function_frame.emit(Instruction::StoreVar(params.len() - 1 - position), line);
        }
        self.compile_block(body, &mut function_frame)?;

        let key = (file, name.to_string());
        match self.function_map.get(&key) {
            Some(&index) => self.functions[index] = function_frame,
            None => {
                self.functions.push(function_frame);
                self.function_map.insert(key, self.functions.len() - 1);
                self.function_names.push(name.to_string());
            }
        }
        Ok(())
    }

    fn compile_statement(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<(), CompileError> {
        let line = stmt.span().start.line;
        match stmt {
            Stmt::VarDef { name, value, .. } => {
                self.compile_expression(value, frame)?;
                if frame.is_root {
                    let index = match self.global_map.get(name) {
                        Some(&index) => index,
                        None => {
                            self.globals.push(Value::Null);
                            let index = self.globals.len() - 1;
                            self.global_map.insert(name.clone(), index);
                            index
                        }
                    };
                    frame.emit(Instruction::StoreGlobal(index), line);
                } else {
                    let index = match frame.variable_map.get(name) {
                        Some(&index) => index,
                        None => {
                            frame.variables.push(Value::Null);
                            let index = frame.variables.len() - 1;
                            frame.variable_map.insert(name.clone(), index);
                            index
                        }
                    };
                    frame.emit(Instruction::StoreVar(index), line);
                }
                // Every form evaluates to something; a definition yields null.
                frame.emit(Instruction::StoreNull, line);
            }
            Stmt::While {
                condition, body, ..
            } => {
                let cond_start = frame.code.len() as i32 - 1;
                self.compile_expression(condition, frame)?;
                frame.emit(Instruction::CondJumpFalse(0), line);
                let cond_jump_index = frame.code.len() - 1;
                self.compile_block(body, frame)?;
                frame.patch_jump(cond_jump_index, (frame.code.len() - cond_jump_index) as i32);
                let back_offset = cond_start - frame.code.len() as i32;
                frame.emit(Instruction::Jump(back_offset), line);
                frame.emit(Instruction::StoreNull, line);
            }
            Stmt::FuncDef {
                name, params, body, ..
            } => {
                self.compile_function(frame.file.clone(), name, params, body, line)?;
            }
            Stmt::StructDef { name, fields, span } => {
                self.declare_struct(name, fields, *span, frame.file.clone())?;
            }
            Stmt::StructFieldAssign {
                target,
                field,
                value,
                span,
            } => {
                if let Some(&index) = frame.variable_map.get(target) {
                    frame.emit(Instruction::LoadVar(index), line);
                } else if let Some(&index) = self.global_map.get(target) {
                    frame.emit(Instruction::LoadGlobal(index), line);
                } else {
                    return Err(CompileError::new(
                        frame.file.clone(),
                        *span,
                        format!("Unknown variable {target}"),
                    ));
                }
                let name_index = frame.name_index(field);
                frame.emit(Instruction::StructFieldIndex(name_index), line);
                self.compile_expression(value, frame)?;
                frame.emit(Instruction::SetStructField, line);
            }
            Stmt::ReturnValue { value, .. } => {
                if !frame.is_root {
                    self.compile_expression(value, frame)?;
                    frame.emit(Instruction::Return, line);
                }
            }
            Stmt::ReturnVoid { .. } => {
                if !frame.is_root {
                    frame.emit(Instruction::StoreNull, line);
                    frame.emit(Instruction::Return, line);
                }
            }
            // Imports were absorbed while building the AST.
            Stmt::Import { .. } => {}
        }
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

//! Stack VM executing compiled frames.
//!
//! One operand stack is shared across every frame invocation; each
//! activation gets its own copy of the frame's variable slots. After a
//! callee returns, the caller truncates the stack back to its pre-argument
//! depth (the callee's parameter prologue popped the arguments) and pushes
//! the return value.

use std::io::Write;
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::{CompiledProgram, Frame, Instruction, StructDecl};
use crate::value::Value;

/// A runtime failure tagged with the faulting file and line. Each frame the
/// error propagates through appends its own (file, line) to `trace`.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{file}:{line}: {message}")]
pub struct RuntimeError {
    pub file: Rc<str>,
    pub line: u32,
    pub message: String,
    pub trace: Vec<(Rc<str>, u32)>,
}

impl RuntimeError {
    fn new(frame: &Frame, pc: usize, message: impl Into<String>) -> Self {
        Self {
            file: frame.file.clone(),
            line: frame.line_map.get(pc).copied().unwrap_or(0),
            message: message.into(),
            trace: Vec::new(),
        }
    }

    fn add_trace(mut self, frame: &Frame, pc: usize) -> Self {
        self.trace
            .push((frame.file.clone(), frame.line_map.get(pc).copied().unwrap_or(0)));
        self
    }
}

pub type VmResult<T> = Result<T, RuntimeError>;

pub struct Vm<'a> {
    functions: Vec<Rc<Frame>>,
    globals: Vec<Value>,
    structs: Vec<Rc<StructDecl>>,
    program_args: Vec<String>,
    stack: Vec<Value>,
    out: &'a mut dyn Write,
}

/// Runs a compiled program to completion and returns its final value.
pub fn eval(
    program: &CompiledProgram,
    program_args: Vec<String>,
    out: &mut dyn Write,
) -> VmResult<Value> {
    let mut vm = Vm {
        functions: program.functions.clone(),
        globals: program.globals.clone(),
        structs: program.structs.clone(),
        program_args,
        stack: Vec::new(),
        out,
    };
    vm.execute_frame(&program.root)
}

impl<'a> Vm<'a> {
    fn execute_frame(&mut self, frame: &Frame) -> VmResult<Value> {
        let mut variables = frame.variables.clone();
        let mut pc: i64 = 0;

        while pc >= 0 && (pc as usize) < frame.code.len() {
            let index = pc as usize;
            match frame.code[index] {
                Instruction::Pop => {
                    self.pop(frame, index)?;
                }
                Instruction::Add => {
                    let rhs = self.pop(frame, index)?;
                    let lhs = self.pop(frame, index)?;
                    let (lhs, rhs) = match (&lhs, &rhs) {
                        (Value::Num(lhs), Value::Num(rhs)) => (*lhs, *rhs),
                        (Value::Num(_), other) | (other, _) => {
                            return Err(RuntimeError::new(
                                frame,
                                index,
                                format!(
                                    "Type error - expected type num for add, got {}",
                                    other.kind_name()
                                ),
                            ));
                        }
                    };
                    self.stack.push(Value::Num(lhs + rhs));
                }
                Instruction::Jump(offset) => {
                    pc += offset as i64;
                }
                Instruction::CondJump(offset) => {
                    if self.pop_condition(frame, index)? {
                        pc += offset as i64;
                    }
                }
                Instruction::CondJumpFalse(offset) => {
                    if !self.pop_condition(frame, index)? {
                        pc += offset as i64;
                    }
                }
                Instruction::LoadConst(constant) => {
                    self.stack.push(frame.constants[constant].clone());
                }
                Instruction::LoadVar(slot) => {
                    self.stack.push(variables[slot].clone());
                }
                Instruction::StoreVar(slot) => {
                    variables[slot] = self.pop(frame, index)?;
                }
                Instruction::LoadGlobal(global) => {
                    self.stack.push(self.globals[global].clone());
                }
                Instruction::StoreGlobal(global) => {
                    self.globals[global] = self.pop(frame, index)?;
                }
                Instruction::CallBuiltin(builtin) => {
                    let args = self.pop_many(builtin.arity(), frame, index)?;
                    let result = builtin
                        .apply(args, self.out)
                        .map_err(|err| RuntimeError::new(frame, index, err.to_string()))?;
                    self.stack.push(result);
                }
                Instruction::CallFunction(function) => {
                    let callee = self.functions[function].clone();
                    let keep = self.stack.len().saturating_sub(callee.params.len());
                    let value = self
                        .execute_frame(&callee)
                        .map_err(|err| err.add_trace(frame, index))?;
                    self.stack.truncate(keep);
                    self.stack.push(value);
                }
                Instruction::CallClosure => {
                    let closure = match self.pop(frame, index)? {
                        Value::Closure(closure) => closure,
                        other => {
                            return Err(RuntimeError::new(
                                frame,
                                index,
                                format!("Type error - expected closure, got {}", other.kind_name()),
                            ));
                        }
                    };
                    let keep = self.stack.len().saturating_sub(closure.params.len());
                    let value = self
                        .execute_frame(&closure.frame)
                        .map_err(|err| err.add_trace(frame, index))?;
                    self.stack.truncate(keep);
                    self.stack.push(value);
                }
                Instruction::CreateList(count) => {
                    let items = self.pop_many(count, frame, index)?;
                    self.stack.push(Value::List(items));
                }
                Instruction::CreateStruct(declaration) => {
                    self.stack
                        .push(Value::new_struct(self.structs[declaration].clone()));
                }
                Instruction::StructFieldIndex(name) => {
                    let field = &frame.names[name];
                    let instance = match self.stack.last() {
                        Some(Value::Struct(instance)) => instance,
                        Some(other) => {
                            return Err(RuntimeError::new(
                                frame,
                                index,
                                format!("Expected type struct, got {}", other.kind_name()),
                            ));
                        }
                        None => return Err(self.underflow(frame, index)),
                    };
                    let position = instance.field_index(field).ok_or_else(|| {
                        RuntimeError::new(frame, index, format!("Field {field} not found on struct"))
                    })?;
                    self.stack.push(Value::Num(position as f64));
                }
                Instruction::SetStructField => {
                    let value = self.pop(frame, index)?;
                    let position = self.field_position(frame, index)?;
                    match self.stack.last() {
                        Some(Value::Struct(instance)) => {
                            instance.fields.borrow_mut()[position] = value;
                        }
                        Some(other) => {
                            return Err(RuntimeError::new(
                                frame,
                                index,
                                format!("Expected type struct, got {}", other.kind_name()),
                            ));
                        }
                        None => return Err(self.underflow(frame, index)),
                    }
                }
                Instruction::GetStructField => {
                    let position = self.field_position(frame, index)?;
                    let value = match self.pop(frame, index)? {
                        Value::Struct(instance) => instance.fields.borrow()[position].clone(),
                        other => {
                            return Err(RuntimeError::new(
                                frame,
                                index,
                                format!("Expected type struct, got {}", other.kind_name()),
                            ));
                        }
                    };
                    self.stack.push(value);
                }
                Instruction::StoreNull => {
                    self.stack.push(Value::Null);
                }
                Instruction::Return => break,
                Instruction::PushArgs => {
                    let args = self
                        .program_args
                        .iter()
                        .map(|arg| Value::Str(arg.clone()))
                        .collect();
                    self.stack.push(Value::List(args));
                }
                Instruction::PushClosureVar { src, dst } => {
                    let captured = variables[src].clone();
                    self.write_closure_slot(frame, index, dst, captured)?;
                }
                Instruction::PushGlobalClosureVar { src, dst } => {
                    let captured = self.globals[src].clone();
                    self.write_closure_slot(frame, index, dst, captured)?;
                }
            }
            pc += 1;
        }

        Ok(self.stack.pop().unwrap_or(Value::Null))
    }

    /// Writes a captured value into a slot of the closure sitting on top of
    /// the stack.
    fn write_closure_slot(
        &mut self,
        frame: &Frame,
        pc: usize,
        slot: usize,
        value: Value,
    ) -> VmResult<()> {
        match self.stack.last_mut() {
            Some(Value::Closure(closure)) => {
                Rc::make_mut(closure).frame.variables[slot] = value;
                Ok(())
            }
            Some(other) => Err(RuntimeError::new(
                frame,
                pc,
                format!("Type error - expected closure, got {}", other.kind_name()),
            )),
            None => Err(self.underflow(frame, pc)),
        }
    }

    /// Pops the field index pushed by StructFieldIndex.
    fn field_position(&mut self, frame: &Frame, pc: usize) -> VmResult<usize> {
        match self.pop(frame, pc)? {
            Value::Num(position) => Ok(position as usize),
            other => Err(RuntimeError::new(
                frame,
                pc,
                format!("Expected field index, got {}", other.kind_name()),
            )),
        }
    }

    fn pop_condition(&mut self, frame: &Frame, pc: usize) -> VmResult<bool> {
        match self.pop(frame, pc)? {
            Value::Bool(value) => Ok(value),
            other => Err(RuntimeError::new(
                frame,
                pc,
                format!(
                    "Type error - expected type bool for condition, got {}",
                    other.kind_name()
                ),
            )),
        }
    }

    fn pop(&mut self, frame: &Frame, pc: usize) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| self.underflow(frame, pc))
    }

    /// Pops `count` values, returning them in push order.
    fn pop_many(&mut self, count: usize, frame: &Frame, pc: usize) -> VmResult<Vec<Value>> {
        if self.stack.len() < count {
            return Err(self.underflow(frame, pc));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn underflow(&self, frame: &Frame, pc: usize) -> RuntimeError {
        RuntimeError::new(frame, pc, "Stack underflow")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run_frame(frame: Frame) -> VmResult<Value> {
        let program = CompiledProgram {
            root: frame,
            functions: Vec::new(),
            function_names: Vec::new(),
            globals: Vec::new(),
            global_map: HashMap::new(),
            structs: Vec::new(),
            struct_map: HashMap::new(),
            main_index: None,
        };
        let mut out = Vec::new();
        eval(&program, Vec::new(), &mut out)
    }

    fn frame_with(code: Vec<Instruction>, constants: Vec<Value>) -> Frame {
        let mut frame = Frame::new(Rc::from("<vm-test>"));
        frame.is_root = true;
        for instruction in code {
            frame.emit(instruction, 1);
        }
        frame.constants = constants;
        frame
    }

    #[test]
    fn empty_frame_evaluates_to_null() {
        let value = run_frame(frame_with(vec![], vec![])).expect("run failed");
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn add_requires_numbers() {
        let frame = frame_with(
            vec![
                Instruction::LoadConst(0),
                Instruction::LoadConst(1),
                Instruction::Add,
            ],
            vec![Value::Num(1.0), Value::Bool(true)],
        );
        let err = run_frame(frame).expect_err("should fail");
        assert!(err.message.contains("expected type num"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn cond_jump_takes_the_branch_when_true() {
        // true → skip the first constant load, fall into the second.
        let frame = frame_with(
            vec![
                Instruction::LoadConst(0),
                Instruction::CondJump(1),
                Instruction::LoadConst(1),
                Instruction::LoadConst(2),
            ],
            vec![Value::Bool(true), Value::Num(1.0), Value::Num(2.0)],
        );
        assert_eq!(run_frame(frame).expect("run failed"), Value::Num(2.0));
    }

    #[test]
    fn cond_jump_requires_a_bool() {
        let frame = frame_with(
            vec![Instruction::LoadConst(0), Instruction::CondJump(1)],
            vec![Value::Num(1.0)],
        );
        let err = run_frame(frame).expect_err("should fail");
        assert!(err.message.contains("expected type bool"));
    }

    #[test]
    fn jump_past_the_end_acts_as_return() {
        let frame = frame_with(
            vec![Instruction::LoadConst(0), Instruction::Jump(5)],
            vec![Value::Num(7.0)],
        );
        assert_eq!(run_frame(frame).expect("run failed"), Value::Num(7.0));
    }

    #[test]
    fn create_list_preserves_push_order() {
        let frame = frame_with(
            vec![
                Instruction::LoadConst(0),
                Instruction::LoadConst(1),
                Instruction::CreateList(2),
            ],
            vec![Value::Num(1.0), Value::Num(2.0)],
        );
        assert_eq!(
            run_frame(frame).expect("run failed"),
            Value::List(vec![Value::Num(1.0), Value::Num(2.0)])
        );
    }

    #[test]
    fn struct_opcodes_round_trip_a_field() {
        let decl = Rc::new(StructDecl {
            name: "point".to_string(),
            field_names: vec!["x".to_string(), "y".to_string()],
        });
        let mut frame = Frame::new(Rc::from("<vm-test>"));
        frame.is_root = true;
        frame.names = vec!["y".to_string()];
        frame.constants = vec![Value::Num(42.0)];
        for instruction in [
            Instruction::CreateStruct(0),
            Instruction::StructFieldIndex(0),
            Instruction::LoadConst(0),
            Instruction::SetStructField,
            Instruction::StructFieldIndex(0),
            Instruction::GetStructField,
        ] {
            frame.emit(instruction, 1);
        }
        let program = CompiledProgram {
            root: frame,
            functions: Vec::new(),
            function_names: Vec::new(),
            globals: Vec::new(),
            global_map: HashMap::new(),
            structs: vec![decl],
            struct_map: HashMap::new(),
            main_index: None,
        };
        let mut out = Vec::new();
        let value = eval(&program, Vec::new(), &mut out).expect("run failed");
        assert_eq!(value, Value::Num(42.0));
    }

    #[test]
    fn unknown_struct_field_is_a_runtime_error() {
        let decl = Rc::new(StructDecl {
            name: "point".to_string(),
            field_names: vec!["x".to_string()],
        });
        let mut frame = Frame::new(Rc::from("<vm-test>"));
        frame.is_root = true;
        frame.names = vec!["z".to_string()];
        frame.emit(Instruction::CreateStruct(0), 3);
        frame.emit(Instruction::StructFieldIndex(0), 3);
        let program = CompiledProgram {
            root: frame,
            functions: Vec::new(),
            function_names: Vec::new(),
            globals: Vec::new(),
            global_map: HashMap::new(),
            structs: vec![decl],
            struct_map: HashMap::new(),
            main_index: None,
        };
        let mut out = Vec::new();
        let err = eval(&program, Vec::new(), &mut out).expect_err("should fail");
        assert!(err.message.contains("Field z not found"));
        assert_eq!(err.line, 3);
    }

    #[test]
    fn push_args_produces_a_string_list() {
        let frame = frame_with(vec![Instruction::PushArgs], vec![]);
        let program = CompiledProgram {
            root: frame,
            functions: Vec::new(),
            function_names: Vec::new(),
            globals: Vec::new(),
            global_map: HashMap::new(),
            structs: Vec::new(),
            struct_map: HashMap::new(),
            main_index: None,
        };
        let mut out = Vec::new();
        let value = eval(
            &program,
            vec!["a".to_string(), "b".to_string()],
            &mut out,
        )
        .expect("run failed");
        assert_eq!(
            value,
            Value::List(vec![Value::Str("a".to_string()), Value::Str("b".to_string())])
        );
    }

    #[test]
    fn stack_underflow_is_reported_not_panicked() {
        let frame = frame_with(vec![Instruction::Pop], vec![]);
        let err = run_frame(frame).expect_err("should fail");
        assert!(err.message.contains("Stack underflow"));
    }
}

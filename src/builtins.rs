//! Name-addressed primitive functions with compile-time-checked arities.
//!
//! `+` also appears here for the catalog, but the compiler lowers it to the
//! dedicated `Add` instruction instead of a builtin call.

use std::io::{BufRead, Write};

use rand::Rng;
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    Log,
    Sqrt,
    Rng,
    Floor,
    Ceil,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Not,
    And,
    Or,
    Concat,
    Panic,
    Print,
    Length,
    Chr,
    Ord,
    ReadFile,
    Input,
    Insert,
    Nth,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuiltinError {
    #[error("Type error for argument {argument} - expected {expected} but got {got}")]
    TypeMismatch {
        argument: usize,
        expected: &'static str,
        got: &'static str,
    },
    #[error("Function length requires argument of type list or string (got {got})")]
    LengthType { got: &'static str },
    #[error("ord expected a string of length 1")]
    OrdLength,
    #[error("chr expected a valid code point")]
    InvalidCodePoint,
    #[error("panic - {0}")]
    Panic(String),
    #[error("Failed to read from file {0}")]
    ReadFile(String),
    #[error("Failed to read from stdin")]
    Input,
    #[error("Failed to write output")]
    Output,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Add => "+",
            Builtin::Sub => "-",
            Builtin::Mul => "*",
            Builtin::Div => "/",
            Builtin::Pow => "^",
            Builtin::Mod => "mod",
            Builtin::Log => "log",
            Builtin::Sqrt => "sqrt",
            Builtin::Rng => "rng",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Gt => ">",
            Builtin::Ge => ">=",
            Builtin::Lt => "<",
            Builtin::Le => "<=",
            Builtin::Eq => "=",
            Builtin::Not => "not",
            Builtin::And => "and",
            Builtin::Or => "or",
            Builtin::Concat => "concat",
            Builtin::Panic => "panic",
            Builtin::Print => "print",
            Builtin::Length => "length",
            Builtin::Chr => "chr",
            Builtin::Ord => "ord",
            Builtin::ReadFile => "readFile",
            Builtin::Input => "input",
            Builtin::Insert => "insert",
            Builtin::Nth => "nth",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "+" => Builtin::Add,
            "-" => Builtin::Sub,
            "*" => Builtin::Mul,
            "/" => Builtin::Div,
            "^" => Builtin::Pow,
            "mod" => Builtin::Mod,
            "log" => Builtin::Log,
            "sqrt" => Builtin::Sqrt,
            "rng" => Builtin::Rng,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            ">" => Builtin::Gt,
            ">=" => Builtin::Ge,
            "<" => Builtin::Lt,
            "<=" => Builtin::Le,
            "=" => Builtin::Eq,
            "not" => Builtin::Not,
            "and" => Builtin::And,
            "or" => Builtin::Or,
            "concat" => Builtin::Concat,
            "panic" => Builtin::Panic,
            "print" => Builtin::Print,
            "length" => Builtin::Length,
            "chr" => Builtin::Chr,
            "ord" => Builtin::Ord,
            "readFile" => Builtin::ReadFile,
            "input" => Builtin::Input,
            "insert" => Builtin::Insert,
            "nth" => Builtin::Nth,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Rng | Builtin::Input => 0,
            Builtin::Sqrt
            | Builtin::Floor
            | Builtin::Ceil
            | Builtin::Not
            | Builtin::Panic
            | Builtin::Print
            | Builtin::Length
            | Builtin::Chr
            | Builtin::Ord
            | Builtin::ReadFile => 1,
            Builtin::Add
            | Builtin::Sub
            | Builtin::Mul
            | Builtin::Div
            | Builtin::Pow
            | Builtin::Mod
            | Builtin::Log
            | Builtin::Gt
            | Builtin::Ge
            | Builtin::Lt
            | Builtin::Le
            | Builtin::Eq
            | Builtin::And
            | Builtin::Or
            | Builtin::Concat
            | Builtin::Nth => 2,
            Builtin::Insert => 3,
        }
    }

    /// Applies the builtin to `args` (whose length matches `arity`, checked
    /// at compile time). Program output goes through `out`, so a host can
    /// capture it.
    pub fn apply(self, args: Vec<Value>, out: &mut dyn Write) -> Result<Value, BuiltinError> {
        match self {
            Builtin::Add => binary_num(&args, |a, b| a + b),
            Builtin::Sub => binary_num(&args, |a, b| a - b),
            Builtin::Mul => binary_num(&args, |a, b| a * b),
            Builtin::Div => binary_num(&args, |a, b| a / b),
            Builtin::Pow => binary_num(&args, f64::powf),
            Builtin::Mod => binary_num(&args, |a, b| a % b),
            // (log base x) = ln(x) / ln(base)
            Builtin::Log => binary_num(&args, |base, x| x.ln() / base.ln()),
            Builtin::Sqrt => Ok(Value::Num(num(&args, 0)?.sqrt())),
            Builtin::Rng => Ok(Value::Num(rand::rng().random())),
            Builtin::Floor => Ok(Value::Num(num(&args, 0)?.floor())),
            Builtin::Ceil => Ok(Value::Num(num(&args, 0)?.ceil())),
            Builtin::Gt => binary_compare(&args, |a, b| a > b),
            Builtin::Ge => binary_compare(&args, |a, b| a >= b),
            Builtin::Lt => binary_compare(&args, |a, b| a < b),
            Builtin::Le => binary_compare(&args, |a, b| a <= b),
            Builtin::Eq => Ok(Value::Bool(args[0] == args[1])),
            Builtin::Not => Ok(Value::Bool(!boolean(&args, 0)?)),
            Builtin::And => Ok(Value::Bool(boolean(&args, 0)? && boolean(&args, 1)?)),
            Builtin::Or => Ok(Value::Bool(boolean(&args, 0)? || boolean(&args, 1)?)),
            Builtin::Concat => {
                let mut joined = raw_text(&args[0]);
                joined.push_str(&raw_text(&args[1]));
                Ok(Value::Str(joined))
            }
            Builtin::Panic => Err(BuiltinError::Panic(string(&args, 0)?.to_string())),
            Builtin::Print => {
                write!(out, "{}", raw_text(&args[0])).map_err(|_| BuiltinError::Output)?;
                Ok(Value::Null)
            }
            Builtin::Length => match &args[0] {
                Value::List(items) => Ok(Value::Num(items.len() as f64)),
                Value::Str(text) => Ok(Value::Num(text.len() as f64)),
                other => Err(BuiltinError::LengthType {
                    got: other.kind_name(),
                }),
            },
            Builtin::Chr => {
                let code = num(&args, 0)? as i64;
                let character = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(BuiltinError::InvalidCodePoint)?;
                Ok(Value::Str(character.to_string()))
            }
            Builtin::Ord => {
                let text = string(&args, 0)?;
                if text.len() != 1 {
                    return Err(BuiltinError::OrdLength);
                }
                Ok(Value::Num(text.as_bytes()[0] as f64))
            }
            Builtin::ReadFile => {
                let path = string(&args, 0)?;
                std::fs::read_to_string(path)
                    .map(Value::Str)
                    .map_err(|_| BuiltinError::ReadFile(path.to_string()))
            }
            Builtin::Input => {
                let mut line = String::new();
                std::io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .map_err(|_| BuiltinError::Input)?;
                Ok(Value::Str(line))
            }
            Builtin::Insert => {
                let index = num(&args, 0)?;
                let mut args = args;
                let list = match args.pop() {
                    Some(Value::List(items)) => items,
                    Some(other) => {
                        return Err(BuiltinError::TypeMismatch {
                            argument: 3,
                            expected: "list",
                            got: other.kind_name(),
                        });
                    }
                    None => unreachable!("arity checked at compile time"),
                };
                let value = args.pop().expect("arity checked at compile time");
                let mut items = list;
                // Negative indexes clamp to the front, past-the-end appends.
                let index = (index.max(0.0) as usize).min(items.len());
                items.insert(index, value);
                Ok(Value::List(items))
            }
            Builtin::Nth => {
                let index = num(&args, 0)?;
                match &args[1] {
                    Value::List(items) => {
                        if index < 0.0 {
                            return Ok(Value::Null);
                        }
                        Ok(items.get(index as usize).cloned().unwrap_or(Value::Null))
                    }
                    Value::Str(text) => {
                        if index < 0.0 || index as usize >= text.len() {
                            return Ok(Value::Null);
                        }
                        let byte = text.as_bytes()[index as usize];
                        Ok(Value::Str((byte as char).to_string()))
                    }
                    other => Err(BuiltinError::TypeMismatch {
                        argument: 2,
                        expected: "string or list",
                        got: other.kind_name(),
                    }),
                }
            }
        }
    }
}

fn num(args: &[Value], index: usize) -> Result<f64, BuiltinError> {
    match &args[index] {
        Value::Num(value) => Ok(*value),
        other => Err(BuiltinError::TypeMismatch {
            argument: index + 1,
            expected: "num",
            got: other.kind_name(),
        }),
    }
}

fn boolean(args: &[Value], index: usize) -> Result<bool, BuiltinError> {
    match &args[index] {
        Value::Bool(value) => Ok(*value),
        other => Err(BuiltinError::TypeMismatch {
            argument: index + 1,
            expected: "bool",
            got: other.kind_name(),
        }),
    }
}

fn string<'a>(args: &'a [Value], index: usize) -> Result<&'a str, BuiltinError> {
    match &args[index] {
        Value::Str(value) => Ok(value),
        other => Err(BuiltinError::TypeMismatch {
            argument: index + 1,
            expected: "string",
            got: other.kind_name(),
        }),
    }
}

fn binary_num(args: &[Value], operation: fn(f64, f64) -> f64) -> Result<Value, BuiltinError> {
    Ok(Value::Num(operation(num(args, 0)?, num(args, 1)?)))
}

fn binary_compare(args: &[Value], operation: fn(f64, f64) -> bool) -> Result<Value, BuiltinError> {
    Ok(Value::Bool(operation(num(args, 0)?, num(args, 1)?)))
}

/// String operands contribute their raw text; everything else contributes
/// its canonical printed form.
fn raw_text(value: &Value) -> String {
    match value {
        Value::Str(text) => text.clone(),
        other => other.to_string(),
    }
}

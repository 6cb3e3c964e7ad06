//! The tagged runtime value.
//!
//! Lists behave as values: every push and pop moves an owned `Value`.
//! Structs are the one shared-mutable kind: instances live behind `Rc` so
//! two variables naming the same struct observe the same field writes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::{Frame, StructDecl};

#[derive(Debug, Clone, Default)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(String),
    #[default]
    Null,
    List(Vec<Value>),
    Closure(Rc<ClosureValue>),
    Struct(Rc<StructInstance>),
}

/// A closure pairs its parameter names with a body frame whose variable
/// slots hold the values captured at construction time.
#[derive(Debug, Clone)]
pub struct ClosureValue {
    pub params: Vec<String>,
    pub frame: Frame,
}

#[derive(Debug)]
pub struct StructInstance {
    pub decl: Rc<StructDecl>,
    pub fields: RefCell<Vec<Value>>,
}

impl StructInstance {
    pub fn new(decl: Rc<StructDecl>) -> Self {
        let fields = vec![Value::Null; decl.field_names.len()];
        Self {
            decl,
            fields: RefCell::new(fields),
        }
    }

    /// Positional index of `name` in the declaration's field list.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.decl.field_names.iter().position(|field| field == name)
    }
}

impl Value {
    pub fn new_struct(decl: Rc<StructDecl>) -> Self {
        Value::Struct(Rc::new(StructInstance::new(decl)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "num",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Closure(_) => "closure",
            Value::Struct(_) => "struct",
        }
    }
}

/// Structural equality: values of different kinds are unequal, numbers
/// compare as floats, lists element-wise, structs by type name and pairwise
/// fields. Closures are equal only to themselves.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => {
                a.decl.name == b.decl.name && *a.fields.borrow() == *b.fields.borrow()
            }
            _ => false,
        }
    }
}

/// Canonical printed form. Strings render quoted here; `print` and `concat`
/// use the raw text for string operands instead.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(value) => write!(f, "{}", format_num(*value)),
            Value::Str(value) => write!(f, "\"{value}\""),
            Value::Bool(value) => write!(f, "{}", if *value { "true" } else { "false" }),
            Value::Null => write!(f, "null"),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::Closure(closure) => write!(f, "lambda({})", closure.params.join(" ")),
            Value::Struct(instance) => {
                write!(f, "{}{{", instance.decl.name)?;
                let fields = instance.fields.borrow();
                for (name, value) in instance.decl.field_names.iter().zip(fields.iter()) {
                    write!(f, "{name}:{value},")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Numbers within 1e-6 of an integer print without a fractional part.
pub fn format_num(value: f64) -> String {
    if (value - (value as i64 as f64)).abs() < 1e-6 {
        format!("{}", value as i64)
    } else {
        format!("{value:.6}")
    }
}

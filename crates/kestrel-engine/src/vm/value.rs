//! Runtime values of the reference host

use super::error::RuntimeError;
use kestrel_bytecode::{BytecodeUnit, Constant, Kind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Native function signature
pub type BuiltinFn = fn(&[Value]) -> Result<Value, RuntimeError>;

/// A host-provided callable
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

/// Iterator state
#[derive(Debug, Clone)]
pub enum ValueIter {
    Range { next: i64, stop: i64, step: i64 },
    Items { items: Vec<Value>, position: usize },
}

impl ValueIter {
    /// Advance, returning `None` when exhausted
    pub fn advance(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let value = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(value))
            }
            ValueIter::Items { items, position } => {
                let value = items.get(*position).cloned()?;
                *position += 1;
                Some(value)
            }
        }
    }
}

/// A runtime value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Mutex<Vec<Value>>>),
    Tuple(Arc<[Value]>),
    /// Insertion-ordered key/value pairs
    Dict(Arc<Mutex<Vec<(Value, Value)>>>),
    Function(Arc<BytecodeUnit>),
    Builtin(Builtin),
    Iterator(Arc<Mutex<ValueIter>>),
    Exception(Arc<RuntimeError>),
}

impl Value {
    pub fn str(text: &str) -> Self {
        Value::Str(Arc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        Value::Dict(Arc::new(Mutex::new(pairs)))
    }

    pub fn iterator(state: ValueIter) -> Self {
        Value::Iterator(Arc::new(Mutex::new(state)))
    }

    /// Runtime kind, as seen by the profiler
    pub fn kind(&self) -> Kind {
        match self {
            Value::None => Kind::None,
            Value::Bool(_) => Kind::Boolean,
            Value::Int(_) => Kind::Integer,
            Value::Float(_) => Kind::Float,
            Value::Str(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Tuple(_) => Kind::Tuple,
            Value::Dict(_) => Kind::Dict,
            Value::Function(_) | Value::Builtin(_) => Kind::Function,
            Value::Iterator(_) => Kind::Iterator,
            Value::Exception(_) => Kind::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function",
            Value::Iterator(_) => "iterator",
            Value::Exception(_) => "exception",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.lock().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(pairs) => !pairs.lock().is_empty(),
            Value::Function(_) | Value::Builtin(_) | Value::Iterator(_) | Value::Exception(_) => {
                true
            }
        }
    }

    /// Integer view of an int or bool
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of any number
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    /// Value equality (`==`)
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                self.as_int() == other.as_int()
            }
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || seq_equals(&a.lock().clone(), &b.lock().clone())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.lock().clone(), b.lock().clone());
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter().any(|(k, v)| k.equals(key) && v.equals(value))
                    })
            }
            _ => self.is(other),
        }
    }

    /// Identity (`is`)
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Iterator(a), Value::Iterator(b)) => Arc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Printable form with strings quoted
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("{:?}", s),
            other => other.to_string(),
        }
    }
}

fn seq_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => write!(f, "[{}]", join_repr(&items.lock())),
            Value::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0].repr()),
            Value::Tuple(items) => write!(f, "({})", join_repr(items)),
            Value::Dict(pairs) => {
                let body: Vec<String> = pairs
                    .lock()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                write!(f, "{{{}}}", body.join(", "))
            }
            Value::Function(unit) => write!(f, "<function {}>", unit.name()),
            Value::Builtin(builtin) => write!(f, "<built-in function {}>", builtin.name),
            Value::Iterator(_) => f.write_str("<iterator>"),
            Value::Exception(err) => write!(f, "{}", err),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(x) => Value::Float(*x),
            Constant::Str(s) => Value::str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Value::Int(1).kind(), Kind::Integer);
        assert_eq!(Value::Bool(true).kind(), Kind::Boolean);
        assert_eq!(Value::list(vec![]).kind(), Kind::List);
        assert_eq!(Value::Exception(Arc::new(RuntimeError::internal("x"))).kind(), Kind::Object);
    }

    #[test]
    fn test_numeric_equality() {
        assert!(Value::Int(1).equals(&Value::Float(1.0)));
        assert!(Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Int(1).equals(&Value::str("1")));
        assert!(Value::tuple(vec![Value::Int(1)]).equals(&Value::tuple(vec![Value::Float(1.0)])));
    }

    #[test]
    fn test_identity() {
        let list = Value::list(vec![]);
        assert!(list.is(&list.clone()));
        assert!(!list.is(&Value::list(vec![])));
        assert!(list.equals(&Value::list(vec![])));
    }

    #[test]
    fn test_display() {
        let value = Value::list(vec![Value::Int(1), Value::str("a"), Value::Float(2.5)]);
        assert_eq!(value.to_string(), "[1, \"a\", 2.5]");
        assert_eq!(Value::tuple(vec![Value::None]).to_string(), "(None,)");
        assert_eq!(Value::dict(vec![(Value::str("k"), Value::Bool(false))]).to_string(), "{\"k\": False}");
    }

    #[test]
    fn test_range_iterator() {
        let mut iter = ValueIter::Range { next: 3, stop: 0, step: -1 };
        let values: Vec<i64> = std::iter::from_fn(|| iter.advance())
            .filter_map(|v| v.as_int())
            .collect();
        assert_eq!(values, vec![3, 2, 1]);
    }
}

//! Activation record of one bytecode unit

use super::error::RuntimeError;
use super::value::Value;
use kestrel_bytecode::{BytecodeUnit, Kind};
use std::sync::Arc;

/// Locals, operand stack and cursor of an executing unit
#[derive(Debug)]
pub struct Frame {
    pub unit: Arc<BytecodeUnit>,
    /// Local variables; `None` while unbound
    pub locals: Vec<Option<Value>>,
    pub stack: Vec<Value>,
    /// Index of the next instruction
    pub pc: usize,
    /// Exception being handled, for bare `raise`
    pub current_exception: Option<Arc<RuntimeError>>,
}

impl Frame {
    /// Bind `args` to the unit's argument locals
    pub fn new(unit: Arc<BytecodeUnit>, args: Vec<Value>) -> Result<Self, RuntimeError> {
        if args.len() != unit.arg_count() {
            return Err(RuntimeError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                unit.name(),
                unit.arg_count(),
                args.len()
            )));
        }
        let mut locals: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        locals.resize(unit.local_count(), None);
        Ok(Frame {
            unit,
            locals,
            stack: Vec::new(),
            pc: 0,
            current_exception: None,
        })
    }

    /// Kinds of the argument locals as currently bound
    pub fn argument_kinds(&self) -> Vec<Option<Kind>> {
        self.locals
            .iter()
            .take(self.unit.arg_count())
            .map(|local| local.as_ref().map(Value::kind))
            .collect()
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal(format!("stack underflow at {}", self.pc)))
    }

    /// Pop `count` values, bottom first
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        if self.stack.len() < count {
            return Err(RuntimeError::internal(format!("stack underflow at {}", self.pc)));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Value `depth` slots below the top (0 = top of stack)
    pub fn peek(&self, depth: usize) -> Option<&Value> {
        self.stack.len().checked_sub(depth + 1).map(|i| &self.stack[i])
    }

    /// Whether the cursor indexes an instruction of the unit
    ///
    /// An empty unit has only position 0.
    pub fn cursor_in_bounds(&self) -> bool {
        self.pc < self.unit.len() || (self.unit.is_empty() && self.pc == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_bytecode::UnitBuilder;

    #[test]
    fn test_argument_binding() {
        let mut b = UnitBuilder::new("f").args(2).locals(3);
        b.load_fast(0);
        b.return_value();
        let unit = Arc::new(b.build().unwrap());

        let frame = Frame::new(Arc::clone(&unit), vec![Value::Int(1), Value::Float(2.0)]).unwrap();
        assert_eq!(frame.locals.len(), 3);
        assert!(frame.locals[2].is_none());
        assert_eq!(frame.argument_kinds(), vec![Some(Kind::Integer), Some(Kind::Float)]);

        let err = Frame::new(unit, vec![Value::Int(1)]).unwrap_err();
        assert!(err.message.contains("takes 2 positional arguments but 1 were given"));
    }

    #[test]
    fn test_stack_ops() {
        let unit = Arc::new(UnitBuilder::new("f").build().unwrap());
        let mut frame = Frame::new(unit, vec![]).unwrap();
        frame.push(Value::Int(1));
        frame.push(Value::Int(2));
        assert!(frame.peek(1).unwrap().equals(&Value::Int(1)));
        let both = frame.pop_n(2).unwrap();
        assert!(both[0].equals(&Value::Int(1)));
        assert!(frame.pop().is_err());
        assert!(frame.cursor_in_bounds());
    }

    #[test]
    fn test_cursor_bounds() {
        let mut b = UnitBuilder::new("f");
        b.load_none();
        b.return_value();
        let unit = Arc::new(b.build().unwrap());
        let mut frame = Frame::new(Arc::clone(&unit), vec![]).unwrap();

        frame.pc = 1;
        assert!(frame.cursor_in_bounds());
        frame.pc = unit.len();
        assert!(!frame.cursor_in_bounds());
    }
}

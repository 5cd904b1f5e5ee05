//! Host-level exceptions

use super::value::Value;
use std::fmt;

/// Exception class of a [`RuntimeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    TypeError,
    NameError,
    UnboundLocalError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    OverflowError,
    ImportError,
    RecursionError,
    ValueError,
    /// Internal failure of the executing frame (bad stack, bad operand)
    RuntimeError,
    /// Raised by user code with an arbitrary payload
    Exception,
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::Exception => "Exception",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception propagating out of a frame
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    pub kind: ExceptionKind,
    pub message: String,
    /// Value passed to `raise`, when user code raised one
    pub payload: Option<Value>,
}

impl RuntimeError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            payload: None,
        }
    }

    /// Exception raised by user code with `payload`
    pub fn raised(payload: Value) -> Self {
        RuntimeError {
            kind: ExceptionKind::Exception,
            message: payload.repr(),
            payload: Some(payload),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::OverflowError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IndexError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }
}

impl PartialEq for RuntimeError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && match (&self.payload, &other.payload) {
                (Some(a), Some(b)) => a.equals(b),
                (None, None) => true,
                _ => false,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RuntimeError::zero_division("division by zero");
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_raised_payload() {
        let err = RuntimeError::raised(Value::Int(7));
        assert_eq!(err.kind, ExceptionKind::Exception);
        assert_eq!(err.message, "7");
        assert_eq!(err, RuntimeError::raised(Value::Int(7)));
        assert_ne!(err, RuntimeError::raised(Value::Int(8)));
    }
}

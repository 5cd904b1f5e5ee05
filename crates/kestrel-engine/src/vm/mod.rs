//! Reference host runtime
//!
//! Values, namespaces, frames and the fallback interpreter that compiled
//! code is measured against. The compilation core only touches this layer
//! through [`Interpreter`], [`FrameEvaluator`] and [`Value::kind`].

pub mod builtins;
pub mod error;
pub mod frame;
pub mod interpreter;
pub mod namespace;
pub mod value;

pub use error::{ExceptionKind, RuntimeError};
pub use frame::Frame;
pub use interpreter::{FrameEvaluator, Interpreter, ReferenceInterpreter, MAX_RECURSION_DEPTH};
pub use namespace::{EvaluatorGuard, Namespace};
pub use value::{Builtin, BuiltinFn, Value, ValueIter};

//! Reference bytecode interpreter
//!
//! This is the fallback execution path: every unit can run here whatever
//! its compilation status. When a [`ProfileStore`] is supplied, the kinds of
//! arguments and profiled operands are recorded as they are observed.

pub mod arithmetic;
mod opcodes;

use super::error::{ExceptionKind, RuntimeError};
use super::frame::Frame;
use super::namespace::Namespace;
use super::value::Value;
use crate::jit::profiling::{ProfileSite, ProfileStore};
use kestrel_bytecode::BytecodeUnit;
use std::cell::Cell;
use std::sync::Arc;

/// Maximum nesting of interpreted frames per thread
pub const MAX_RECURSION_DEPTH: usize = 200;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Runs a prepared frame to completion
pub trait Interpreter: Send + Sync {
    fn interpret(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
        profile: Option<&ProfileStore>,
    ) -> Result<Value, RuntimeError>;
}

/// Hook that runs calls to bytecode functions
pub trait FrameEvaluator: Send + Sync {
    fn evaluate(
        &self,
        unit: &Arc<BytecodeUnit>,
        args: Vec<Value>,
        namespace: &Namespace,
    ) -> Result<Value, RuntimeError>;
}

/// Control transfer decided by one instruction
pub(crate) enum OpcodeResult {
    Continue,
    Jump(usize),
    Return(Value),
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, RuntimeError> {
        DEPTH.with(|depth| {
            if depth.get() >= MAX_RECURSION_DEPTH {
                return Err(RuntimeError::new(
                    ExceptionKind::RecursionError,
                    "maximum recursion depth exceeded",
                ));
            }
            depth.set(depth.get() + 1);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Straightforward stack-machine interpreter
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceInterpreter;

impl ReferenceInterpreter {
    pub fn new() -> Self {
        ReferenceInterpreter
    }

    /// Run `unit` with `args` in a fresh frame
    pub fn call(
        &self,
        unit: &Arc<BytecodeUnit>,
        args: Vec<Value>,
        namespace: &Namespace,
        profile: Option<&ProfileStore>,
    ) -> Result<Value, RuntimeError> {
        let mut frame = Frame::new(Arc::clone(unit), args)?;
        self.interpret(&mut frame, namespace, profile)
    }

    fn record_arguments(frame: &Frame, profile: &ProfileStore) {
        for (arg, kind) in frame.argument_kinds().into_iter().enumerate() {
            if let Some(kind) = kind {
                profile.record(ProfileSite::argument(arg), kind);
            }
        }
    }

    fn record_operands(frame: &Frame, index: usize, count: usize, profile: &ProfileStore) {
        for position in 0..count {
            if let Some(value) = frame.peek(position) {
                profile.record(ProfileSite::stack(index, position), value.kind());
            }
        }
    }

    /// Transfer control to the innermost handler covering `index`, if any
    fn unwind(frame: &mut Frame, index: usize, error: RuntimeError) -> Result<(), RuntimeError> {
        let Some(handler) = frame.unit.handler_for(index).copied() else {
            return Err(error);
        };
        if frame.stack.len() < handler.depth {
            return Err(error);
        }
        frame.stack.truncate(handler.depth);
        let exception = Arc::new(error);
        frame.current_exception = Some(Arc::clone(&exception));
        frame.push(Value::Exception(exception));
        frame.pc = handler.target;
        Ok(())
    }
}

impl Interpreter for ReferenceInterpreter {
    fn interpret(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
        profile: Option<&ProfileStore>,
    ) -> Result<Value, RuntimeError> {
        let _depth = DepthGuard::enter()?;
        let unit = Arc::clone(&frame.unit);
        let instructions = unit.instructions();

        if let Some(profile) = profile {
            profile.record_execution();
            Self::record_arguments(frame, profile);
        }

        loop {
            let index = frame.pc;
            let Some(&instr) = instructions.get(index) else {
                // Jump targets are in range, so only the last instruction falls off
                frame.pc = index.saturating_sub(1);
                return Ok(Value::None);
            };

            if let Some(profile) = profile {
                Self::record_operands(frame, index, instr.opcode.profiled_operands(), profile);
            }

            match self.execute(frame, namespace, &instr) {
                Ok(OpcodeResult::Continue) => frame.pc = index + 1,
                Ok(OpcodeResult::Jump(target)) => frame.pc = target,
                Ok(OpcodeResult::Return(value)) => return Ok(value),
                Err(error) => Self::unwind(frame, index, error)?,
            }
        }
    }
}

impl FrameEvaluator for ReferenceInterpreter {
    fn evaluate(
        &self,
        unit: &Arc<BytecodeUnit>,
        args: Vec<Value>,
        namespace: &Namespace,
    ) -> Result<Value, RuntimeError> {
        self.call(unit, args, namespace, None)
    }
}

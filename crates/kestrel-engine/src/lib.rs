//! Kestrel Engine
//!
//! This crate provides the type-specializing JIT for Kestrel bytecode and
//! the reference host it runs against:
//! - **JIT**: CFG, abstract interpretation, escape analysis, profile-guided
//!   compilation and dispatch (`jit` module)
//! - **VM**: Values, namespaces, frames and the reference interpreter (`vm` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use kestrel_engine::{JitEngine, Namespace, Value};
//! use kestrel_bytecode::{BinaryOperator, UnitBuilder};
//!
//! let mut b = UnitBuilder::new("add").args(2);
//! b.load_fast(0);
//! b.load_fast(1);
//! b.binary(BinaryOperator::Add);
//! b.return_value();
//! let unit = Arc::new(b.build()?);
//!
//! let engine = JitEngine::new();
//! let result = engine.dispatch(&unit, vec![Value::Int(2), Value::Int(3)], &Namespace::new())?;
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// JIT module: analysis, escape graph, profiling, backends and dispatch
pub mod jit;

/// VM module: reference host runtime
pub mod vm;

// ============================================================================
// Re-exports from JIT
// ============================================================================

pub use jit::{
    // Analysis
    analysis::{
        build_cfg, infer, AbstractValue, AnalysisError, CfgError, ControlFlowGraph, LocalInfo,
        ProgramPointStates, Slot,
    },
    // Graph
    graph::{build_graph, EscapeTransition, InstructionGraph},
    // Profiling
    profiling::{PgcController, PgcStatus, ProfileSite, ProfileStore, RecompilePolicy, StabilityPolicy},
    // Runtime
    runtime::{CodeCache, CompiledUnitRecord, JitUnit},
    // Engine
    JitConfig, JitEngine, JitError, JitPipeline,
};

// ============================================================================
// Re-exports from VM
// ============================================================================

pub use vm::{
    ExceptionKind, Frame, FrameEvaluator, Interpreter, Namespace, ReferenceInterpreter,
    RuntimeError, Value,
};

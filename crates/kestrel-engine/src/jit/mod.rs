//! Type-specializing JIT for the Kestrel VM
//!
//! This module provides the compilation decision pipeline:
//! - Bytecode analysis (CFG construction, value lattice, abstract interpretation)
//! - Instruction graph with escape classification
//! - Backend trait for pluggable code generation
//! - Profiling infrastructure and the PGC status state machine
//! - Compiled-unit records, code cache and dispatch

pub mod analysis;
pub mod backend;
pub mod config;
pub mod graph;
pub mod pipeline;
pub mod profiling;
pub mod runtime;

mod engine;
pub use config::JitConfig;
pub use engine::JitEngine;
pub use pipeline::{Analysis, Compilation, JitError, JitPipeline};

//! Backend-agnostic code generation traits
//!
//! Defines the `CodegenBackend` trait that pluggable backends implement,
//! along with the compilation input they consume and the code they produce.

use crate::jit::analysis::{ControlFlowGraph, ProgramPointStates};
use crate::jit::graph::InstructionGraph;
use crate::jit::profiling::{ProfileStore, Tier};
use crate::vm::{Frame, Namespace, RuntimeError, Value};
use kestrel_bytecode::BytecodeUnit;
use std::fmt;
use std::sync::Arc;

/// Target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    AArch64,
}

/// Target information
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub arch: TargetArch,
    pub pointer_size: usize,
}

/// Error during code generation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error("Backend error: {0}")]
    BackendError(String),
    #[error("Unsupported instruction: {0}")]
    UnsupportedInstruction(String),
}

/// Everything the analysis produced for one compile attempt
pub struct CompilationInput<'a> {
    pub unit: &'a BytecodeUnit,
    pub cfg: &'a ControlFlowGraph,
    pub states: &'a ProgramPointStates,
    pub graph: &'a InstructionGraph,
    pub tier: Tier,
}

/// Compiled machine code (not yet executable)
#[derive(Debug, Default)]
pub struct CompiledCode {
    /// Raw machine code bytes
    pub code: Vec<u8>,
    /// Offset of the unit entry point within code
    pub entry_offset: usize,
    /// Intermediate representation, kept for diagnostics
    pub ir: Vec<u8>,
}

/// Callable entry of finalized code
pub trait CompiledEntry: Send + Sync {
    /// Run `frame` to completion, recording observations into `profile`
    /// when the code was compiled to keep profiling
    fn invoke(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
        profile: Option<&ProfileStore>,
    ) -> Result<Value, RuntimeError>;
}

/// Executable code, immutable once finalized
#[derive(Clone)]
pub struct ExecutableCode {
    pub code: Arc<[u8]>,
    /// Size of the code region
    pub code_size: usize,
    /// Offset of the entry point
    pub entry_offset: usize,
    pub entry: Arc<dyn CompiledEntry>,
}

impl ExecutableCode {
    pub fn invoke(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
        profile: Option<&ProfileStore>,
    ) -> Result<Value, RuntimeError> {
        self.entry.invoke(frame, namespace, profile)
    }
}

impl fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("code_size", &self.code_size)
            .field("entry_offset", &self.entry_offset)
            .finish_non_exhaustive()
    }
}

/// The backend-agnostic code generation trait
///
/// The compilation pipeline is:
///   CompilationInput → compile_unit() → CompiledCode → finalize() → ExecutableCode
pub trait CodegenBackend: Send + Sync {
    /// Backend name (for diagnostics)
    fn name(&self) -> &str;

    /// Generate code for an analyzed unit
    fn compile_unit(&self, input: &CompilationInput<'_>) -> Result<CompiledCode, CodegenError>;

    /// Produce executable code
    fn finalize(&self, code: &mut CompiledCode) -> Result<ExecutableCode, CodegenError>;

    /// Return target architecture information
    fn target_info(&self) -> TargetInfo;
}

//! Compilation pipeline: bytecode → CFG → abstract states → graph → backend
//!
//! The pipeline chains together all compilation stages:
//! 1. Verify the unit and build its control-flow graph
//! 2. Infer per-point kinds, narrowed by runtime type feedback
//! 3. Build the instruction graph and classify escapes
//! 4. Generate and finalize code through the backend
//!
//! Each stage is a pure function of its inputs, so compiles of different
//! units may run concurrently on separate threads.

use crate::jit::analysis::{
    build_cfg, AbstractInterpreter, AnalysisError, CfgError, ControlFlowGraph, ProgramPointStates,
    TypeFeedback,
};
use crate::jit::backend::{CodegenBackend, CodegenError, CompilationInput, ExecutableCode};
use crate::jit::config::JitConfig;
use crate::jit::graph::{build_graph, InstructionGraph};
use crate::jit::profiling::Tier;
use kestrel_bytecode::{BytecodeUnit, Kind};

/// Errors from the compilation pipeline
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    #[error("{0}")]
    InvalidUnit(#[from] CfgError),
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Codegen error: {0}")]
    Codegen(#[from] CodegenError),
    #[error("Code cache full: {needed} bytes needed, {available} available")]
    CacheFull { needed: usize, available: usize },
}

impl JitError {
    /// Whether retrying can never succeed for this unit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JitError::InvalidUnit(_)
                | JitError::Analysis(
                    AnalysisError::Divergent { .. }
                        | AnalysisError::StackUnderflow { .. }
                        | AnalysisError::StackMismatch { .. }
                )
        )
    }
}

/// Output of the analysis stages
#[derive(Debug)]
pub struct Analysis {
    pub cfg: ControlFlowGraph,
    pub states: ProgramPointStates,
    pub graph: InstructionGraph,
}

/// A successful compile
#[derive(Debug)]
pub struct Compilation {
    pub analysis: Analysis,
    pub code: ExecutableCode,
    pub ir: Vec<u8>,
}

/// Complete JIT compilation pipeline
///
/// Chains: verify → CFG → infer → graph → backend.compile_unit()
pub struct JitPipeline<B: CodegenBackend> {
    backend: B,
}

impl<B: CodegenBackend> JitPipeline<B> {
    pub fn new(backend: B) -> Self {
        JitPipeline { backend }
    }

    /// Run the analysis stages without generating code
    ///
    /// `arg_kinds` overrides the declared kinds of arguments.
    pub fn analyze(
        &self,
        unit: &BytecodeUnit,
        arg_kinds: &[Option<Kind>],
        feedback: Option<&dyn TypeFeedback>,
        config: &JitConfig,
    ) -> Result<Analysis, JitError> {
        let cfg = build_cfg(unit)?;

        let mut interpreter =
            AbstractInterpreter::new(unit, &cfg).max_iterations(config.max_iterations);
        if let Some(feedback) = feedback {
            interpreter = interpreter.with_feedback(feedback);
        }
        let states = interpreter.run(arg_kinds)?;

        let graph = build_graph(unit, &cfg, &states, config.track_escapes);
        Ok(Analysis { cfg, states, graph })
    }

    /// Compile a unit through the full pipeline
    pub fn compile(
        &self,
        unit: &BytecodeUnit,
        tier: Tier,
        feedback: Option<&dyn TypeFeedback>,
        config: &JitConfig,
    ) -> Result<Compilation, JitError> {
        let _span = tracing::debug_span!("compile", unit = unit.name(), %tier).entered();

        let analysis = self.analyze(unit, &[], feedback, config)?;
        let input = CompilationInput {
            unit,
            cfg: &analysis.cfg,
            states: &analysis.states,
            graph: &analysis.graph,
            tier,
        };
        let mut compiled = self.backend.compile_unit(&input)?;
        let code = self.backend.finalize(&mut compiled)?;

        tracing::debug!(
            backend = self.backend.name(),
            code_size = code.code_size,
            unboxed = analysis.graph.unboxed_count(),
            speculations = analysis.states.speculations().len(),
            "unit compiled"
        );

        Ok(Compilation {
            analysis,
            code,
            ir: std::mem::take(&mut compiled.ir),
        })
    }

    /// Get a reference to the backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

//! Top-level JIT engine: owns the pipeline, the PGC controller and the
//! code cache, and is the single entry point the host calls to run a unit.

use crate::jit::analysis::TypeFeedback;
use crate::jit::backend::{CodegenBackend, StubBackend};
use crate::jit::config::JitConfig;
use crate::jit::pipeline::{Analysis, JitError, JitPipeline};
use crate::jit::profiling::{PgcController, PgcStatus, ProfileStore, Tier};
use crate::jit::runtime::{CodeCache, CompiledUnitRecord, JitUnit};
use crate::vm::{Frame, FrameEvaluator, Interpreter, Namespace, ReferenceInterpreter, RuntimeError, Value};
use kestrel_bytecode::{BytecodeUnit, Kind};
use std::sync::Arc;

/// Releases a unit's compile claim when dropped
struct CompileClaim<'a>(&'a JitUnit);

impl Drop for CompileClaim<'_> {
    fn drop(&mut self) {
        self.0.finish_compile();
    }
}

/// Top-level JIT engine managing compilation, caching and dispatch
pub struct JitEngine<B: CodegenBackend = StubBackend> {
    pipeline: JitPipeline<B>,
    controller: PgcController,
    cache: CodeCache,
    interpreter: Arc<dyn Interpreter>,
    config: JitConfig,
}

impl JitEngine<StubBackend> {
    /// Create a new JIT engine with default configuration
    pub fn new() -> Self {
        Self::with_config(JitConfig::default())
    }

    /// Create a new JIT engine with custom configuration
    pub fn with_config(config: JitConfig) -> Self {
        Self::with_backend(StubBackend::new(), config)
    }
}

impl Default for JitEngine<StubBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: CodegenBackend> JitEngine<B> {
    pub fn with_backend(backend: B, config: JitConfig) -> Self {
        JitEngine {
            pipeline: JitPipeline::new(backend),
            controller: PgcController::from_config(&config),
            cache: CodeCache::new(config.code_cache_size),
            interpreter: Arc::new(ReferenceInterpreter::new()),
            config,
        }
    }

    /// Replace the controller, e.g. to plug in a different recompile policy
    pub fn with_controller(mut self, controller: PgcController) -> Self {
        self.controller = controller;
        self
    }

    /// Interpreter used for the fallback path
    pub fn with_interpreter(mut self, interpreter: Arc<dyn Interpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Get a reference to the compilation pipeline
    pub fn pipeline(&self) -> &JitPipeline<B> {
        &self.pipeline
    }

    pub fn controller(&self) -> &PgcController {
        &self.controller
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Runtime state of `unit`, created on first use
    pub fn unit_state(&self, unit: &Arc<BytecodeUnit>) -> Arc<JitUnit> {
        self.cache
            .get_or_insert(unit, || Arc::new(ProfileStore::new()))
    }

    /// Status of `unit`; units never dispatched are uncompiled
    pub fn status(&self, unit: &BytecodeUnit) -> PgcStatus {
        self.cache
            .get(unit.id())
            .map_or(PgcStatus::Uncompiled, |state| state.status())
    }

    pub fn profile(&self, unit: &Arc<BytecodeUnit>) -> Arc<ProfileStore> {
        Arc::clone(self.unit_state(unit).profile())
    }

    /// Run the analysis stages against the unit's current profile
    pub fn analyze(
        &self,
        unit: &Arc<BytecodeUnit>,
        arg_kinds: &[Option<Kind>],
    ) -> Result<Analysis, JitError> {
        let profile = self.profile(unit);
        let feedback: &ProfileStore = &profile;
        self.pipeline
            .analyze(unit, arg_kinds, Some(feedback as &dyn TypeFeedback), &self.config)
    }

    /// Current record of `unit`, compiling first if the controller says so
    pub fn ensure_compiled(&self, unit: &Arc<BytecodeUnit>) -> Arc<CompiledUnitRecord> {
        let state = self.unit_state(unit);
        self.ensure_compiled_state(&state, unit)
    }

    fn ensure_compiled_state(&self, state: &JitUnit, unit: &BytecodeUnit) -> Arc<CompiledUnitRecord> {
        if self.controller.decide(state).is_none() || !state.try_start_compile() {
            return state.record();
        }
        let _claim = CompileClaim(state);
        // Another thread may have compiled between the check and the claim
        if let Some(tier) = self.controller.decide(state) {
            self.compile_claimed(state, unit, tier);
        }
        state.record()
    }

    fn compile_claimed(&self, state: &JitUnit, unit: &BytecodeUnit, tier: Tier) {
        let previous = state.record();
        let epoch = state.profile().epoch();
        let feedback: &ProfileStore = state.profile();

        let compilation = self
            .pipeline
            .compile(unit, tier, Some(feedback as &dyn TypeFeedback), &self.config)
            .and_then(|compilation| {
                let needed = compilation.code.code_size;
                if self.cache.try_reserve(previous.native_size, needed) {
                    Ok(compilation)
                } else {
                    Err(JitError::CacheFull {
                        needed,
                        available: self.cache.available() + previous.native_size,
                    })
                }
            });

        match compilation {
            Ok(compilation) => {
                let native_size = compilation.code.code_size;
                let record = CompiledUnitRecord::compiled(
                    previous.generation + 1,
                    tier.target_status(),
                    epoch,
                    Some(compilation.code),
                    compilation.ir,
                    compilation.analysis.states.speculations().to_vec(),
                );
                if !self.controller.on_success(state, tier, record) {
                    self.cache.rollback(previous.native_size, native_size);
                }
            }
            Err(error) => {
                if self.controller.on_failure(state, tier, &error) {
                    self.cache.release(previous.native_size);
                }
            }
        }
    }

    /// Run `unit` with `args`, on compiled code when available
    pub fn dispatch(
        &self,
        unit: &Arc<BytecodeUnit>,
        args: Vec<Value>,
        namespace: &Namespace,
    ) -> Result<Value, RuntimeError> {
        let mut frame = Frame::new(Arc::clone(unit), args)?;
        self.dispatch_frame(&mut frame, namespace)
    }

    /// Run a prepared frame to completion
    ///
    /// Runtime errors from either path are returned unchanged.
    pub fn dispatch_frame(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
    ) -> Result<Value, RuntimeError> {
        let unit = Arc::clone(&frame.unit);
        let state = self.unit_state(&unit);
        let record = self.ensure_compiled_state(&state, &unit);
        let profile: &ProfileStore = state.profile();

        let result = match record.executable() {
            Some(code) if record.admits(&frame.argument_kinds()) => {
                let profiling = Tier::for_status(record.status).is_some_and(Tier::profiles);
                code.invoke(frame, namespace, profiling.then_some(profile))
            }
            Some(_) => {
                state.note_deopt();
                tracing::trace!(unit = unit.name(), "argument guard failed; interpreting");
                self.interpreter.interpret(frame, namespace, Some(profile))
            }
            None => self.interpreter.interpret(frame, namespace, Some(profile)),
        };
        state.note_execution();

        debug_assert!(frame.cursor_in_bounds());
        result
    }
}

impl<B: CodegenBackend> FrameEvaluator for JitEngine<B> {
    fn evaluate(
        &self,
        unit: &Arc<BytecodeUnit>,
        args: Vec<Value>,
        namespace: &Namespace,
    ) -> Result<Value, RuntimeError> {
        self.dispatch(unit, args, namespace)
    }
}

impl<B: CodegenBackend> std::fmt::Debug for JitEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitEngine")
            .field("backend", &self.pipeline.backend().name())
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::backend::{CodegenError, CompilationInput, CompiledCode, ExecutableCode, TargetInfo};
    use crate::jit::profiling::ProfileSite;
    use kestrel_bytecode::{BinaryOperator, Opcode, UnitBuilder};

    fn add_unit() -> Arc<BytecodeUnit> {
        let mut b = UnitBuilder::new("add").args(2);
        b.load_fast(0);
        b.load_fast(1);
        b.binary(BinaryOperator::Add);
        b.return_value();
        Arc::new(b.build().unwrap())
    }

    fn ints(a: i64, b: i64) -> Vec<Value> {
        vec![Value::Int(a), Value::Int(b)]
    }

    /// Backend whose every compile fails
    struct FailingBackend;

    impl CodegenBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn compile_unit(&self, _input: &CompilationInput<'_>) -> Result<CompiledCode, CodegenError> {
            Err(CodegenError::BackendError("boom".to_string()))
        }

        fn finalize(&self, _code: &mut CompiledCode) -> Result<ExecutableCode, CodegenError> {
            Err(CodegenError::BackendError("boom".to_string()))
        }

        fn target_info(&self) -> TargetInfo {
            StubBackend::new().target_info()
        }
    }

    #[test]
    fn test_engine_creation() {
        let engine = JitEngine::new();
        assert_eq!(engine.pipeline().backend().name(), "stub");
        assert_eq!(engine.cache().entry_count(), 0);
    }

    #[test]
    fn test_engine_with_config() {
        let config = JitConfig {
            compile_threshold: 3,
            ..Default::default()
        };
        let engine = JitEngine::with_config(config);
        let unit = add_unit();
        let ns = Namespace::new();
        for _ in 0..3 {
            engine.dispatch(&unit, ints(1, 2), &ns).unwrap();
            assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);
        }
        engine.dispatch(&unit, ints(1, 2), &ns).unwrap();
        assert_eq!(engine.status(&unit), PgcStatus::CompiledWithProfiling);
    }

    #[test]
    fn test_dispatch_promotes_through_tiers() {
        let engine = JitEngine::new();
        let unit = add_unit();
        let ns = Namespace::new();

        let result = engine.dispatch(&unit, ints(2, 3), &ns).unwrap();
        assert!(result.equals(&Value::Int(5)));
        assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);

        engine.dispatch(&unit, ints(2, 3), &ns).unwrap();
        assert_eq!(engine.status(&unit), PgcStatus::CompiledWithProfiling);
        let record = engine.ensure_compiled(&unit);
        assert_eq!(record.generation, 1);
        assert!(record.code.is_some());
        assert_eq!(engine.cache().total_size(), record.native_size);

        engine.dispatch(&unit, ints(2, 3), &ns).unwrap();
        engine.dispatch(&unit, ints(2, 3), &ns).unwrap();
        let result = engine.dispatch(&unit, ints(4, 4), &ns).unwrap();
        assert!(result.equals(&Value::Int(8)));
        assert_eq!(engine.status(&unit), PgcStatus::Optimized);
        assert_eq!(engine.ensure_compiled(&unit).generation, 2);
    }

    #[test]
    fn test_guard_failure_falls_back() {
        let engine = JitEngine::new();
        let unit = add_unit();
        let ns = Namespace::new();
        engine.dispatch(&unit, ints(1, 1), &ns).unwrap();
        engine.dispatch(&unit, ints(1, 1), &ns).unwrap();
        assert_eq!(engine.status(&unit), PgcStatus::CompiledWithProfiling);

        let result = engine
            .dispatch(&unit, vec![Value::Float(0.5), Value::Float(0.25)], &ns)
            .unwrap();
        assert!(result.equals(&Value::Float(0.75)));
        assert_eq!(engine.unit_state(&unit).deopt_count(), 1);
        assert_eq!(
            engine.profile(&unit).kinds_at(ProfileSite::argument(0)),
            vec![Kind::Integer, Kind::Float]
        );
    }

    #[test]
    fn test_runtime_errors_pass_through() {
        let mut b = UnitBuilder::new("div").args(2);
        b.load_fast(0);
        b.load_fast(1);
        b.binary(BinaryOperator::TrueDivide);
        b.return_value();
        let unit = Arc::new(b.build().unwrap());

        let engine = JitEngine::new();
        let ns = Namespace::new();
        for _ in 0..4 {
            let err = engine.dispatch(&unit, ints(1, 0), &ns).unwrap_err();
            assert_eq!(err.kind, crate::vm::ExceptionKind::ZeroDivisionError);
        }
        assert!(engine.status(&unit).is_compiled());
    }

    #[test]
    fn test_backend_failure_keeps_semantics() {
        let engine = JitEngine::with_backend(FailingBackend, JitConfig::default());
        let unit = add_unit();
        let ns = Namespace::new();

        engine.dispatch(&unit, ints(1, 2), &ns).unwrap();
        engine.dispatch(&unit, ints(1, 2), &ns).unwrap();
        assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);
        assert_eq!(engine.unit_state(&unit).history().failures, 1);

        // New evidence allows one more attempt, which exhausts the budget
        let result = engine
            .dispatch(&unit, vec![Value::str("a"), Value::str("b")], &ns)
            .unwrap();
        assert!(result.equals(&Value::str("ab")));
        engine.dispatch(&unit, ints(1, 2), &ns).unwrap();
        assert_eq!(engine.status(&unit), PgcStatus::Failed);
        assert_eq!(engine.cache().total_size(), 0);

        let result = engine.dispatch(&unit, ints(20, 22), &ns).unwrap();
        assert!(result.equals(&Value::Int(42)));
    }

    #[test]
    fn test_cache_full_defers_compile() {
        let config = JitConfig {
            code_cache_size: 1,
            ..Default::default()
        };
        let engine = JitEngine::with_config(config);
        let unit = add_unit();
        let ns = Namespace::new();
        for _ in 0..3 {
            engine.dispatch(&unit, ints(1, 2), &ns).unwrap();
        }
        assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);
        let state = engine.unit_state(&unit);
        assert_eq!(state.history().failures, 0);
        assert!(state.history().last_error.as_deref().unwrap().starts_with("Code cache full"));
    }

    #[test]
    fn test_engine_as_frame_evaluator() {
        // outer(x) = inner(x) * 2 where inner(y) = y + 1
        let mut b = UnitBuilder::new("inner").args(1);
        b.load_fast(0);
        b.load_int(1);
        b.binary(BinaryOperator::Add);
        b.return_value();
        let inner = Arc::new(b.build().unwrap());

        let mut b = UnitBuilder::new("outer").args(1);
        b.load_global("inner");
        b.load_fast(0);
        b.call(1);
        b.load_int(2);
        b.binary(BinaryOperator::Multiply);
        b.return_value();
        let outer = Arc::new(b.build().unwrap());

        let engine = Arc::new(JitEngine::new());
        let ns = Namespace::new();
        ns.set_global("inner", Value::Function(Arc::clone(&inner)));
        let _guard = ns.install_evaluator(engine.clone());

        for x in 0..3 {
            let result = engine.dispatch(&outer, vec![Value::Int(x)], &ns).unwrap();
            assert!(result.equals(&Value::Int((x + 1) * 2)));
        }
        assert!(engine.status(&inner).is_compiled());
        assert_eq!(engine.cache().entry_count(), 2);
    }

    #[test]
    fn test_unsupported_opcode_stays_uncompiled() {
        let mut b = UnitBuilder::new("annotations");
        b.emit(Opcode::SetupAnnotations, 0);
        let unit = Arc::new(b.build().unwrap());

        let engine = JitEngine::new();
        let ns = Namespace::new();
        for _ in 0..5 {
            let result = engine.dispatch(&unit, Vec::new(), &ns).unwrap();
            assert!(result.equals(&Value::None));
        }
        assert_eq!(engine.status(&unit), PgcStatus::Uncompiled);
        assert_eq!(engine.unit_state(&unit).history().failures, 1);
        assert!(ns.get_global("__annotations__").is_some());
    }
}

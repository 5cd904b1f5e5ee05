//! Global/builtin namespace and the frame-evaluator hook
//!
//! The evaluator hook decides how nested calls to bytecode functions run.
//! It is held by the namespace rather than by process-global state;
//! [`Namespace::install_evaluator`] swaps it for the lifetime of the
//! returned guard and restores the previous one on drop.

use super::builtins;
use super::interpreter::FrameEvaluator;
use super::value::Value;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Name of the global created by `SETUP_ANNOTATIONS`
pub const ANNOTATIONS: &str = "__annotations__";

/// Variables visible to executing frames
pub struct Namespace {
    globals: RwLock<FxHashMap<String, Value>>,
    builtins: FxHashMap<&'static str, Value>,
    modules: RwLock<FxHashMap<String, Value>>,
    output: Mutex<Vec<String>>,
    evaluator: RwLock<Option<Arc<dyn FrameEvaluator>>>,
}

impl Namespace {
    /// Empty globals with the standard builtins
    pub fn new() -> Self {
        let builtins = builtins::all()
            .into_iter()
            .map(|builtin| (builtin.name, Value::Builtin(builtin)))
            .collect();
        Namespace {
            globals: RwLock::new(FxHashMap::default()),
            builtins,
            modules: RwLock::new(FxHashMap::default()),
            output: Mutex::new(Vec::new()),
            evaluator: RwLock::new(None),
        }
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.read().get(name).cloned()
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.globals.write().insert(name.to_string(), value);
    }

    /// Set `name` only if it is not bound yet
    pub fn set_global_default(&self, name: &str, value: impl FnOnce() -> Value) {
        self.globals
            .write()
            .entry(name.to_string())
            .or_insert_with(value);
    }

    pub fn builtin(&self, name: &str) -> Option<Value> {
        self.builtins.get(name).cloned()
    }

    /// Resolve a name: globals first, then builtins
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.get_global(name).or_else(|| self.builtin(name))
    }

    /// Make `value` importable as `name`
    pub fn register_module(&self, name: &str, value: Value) {
        self.modules.write().insert(name.to_string(), value);
    }

    pub fn import(&self, name: &str) -> Option<Value> {
        self.modules.read().get(name).cloned()
    }

    /// Display hook for `PRINT_EXPR`
    pub fn display(&self, value: &Value) {
        if matches!(value, Value::None) {
            return;
        }
        self.output.lock().push(value.repr());
    }

    /// Lines written by the display hook so far
    pub fn output(&self) -> Vec<String> {
        self.output.lock().clone()
    }

    pub fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut *self.output.lock())
    }

    /// Currently installed evaluator
    pub fn evaluator(&self) -> Option<Arc<dyn FrameEvaluator>> {
        self.evaluator.read().clone()
    }

    /// Route nested calls through `evaluator` until the guard drops
    pub fn install_evaluator(&self, evaluator: Arc<dyn FrameEvaluator>) -> EvaluatorGuard<'_> {
        let previous = self.evaluator.write().replace(evaluator);
        EvaluatorGuard {
            namespace: self,
            previous,
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("globals", &self.globals.read().len())
            .field("modules", &self.modules.read().len())
            .field("evaluator", &self.evaluator.read().is_some())
            .finish()
    }
}

/// Restores the previous evaluator when dropped
pub struct EvaluatorGuard<'a> {
    namespace: &'a Namespace,
    previous: Option<Arc<dyn FrameEvaluator>>,
}

impl Drop for EvaluatorGuard<'_> {
    fn drop(&mut self) {
        *self.namespace.evaluator.write() = self.previous.take();
    }
}

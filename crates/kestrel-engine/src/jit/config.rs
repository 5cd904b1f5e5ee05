//! JIT configuration

use crate::jit::analysis::absint::DEFAULT_MAX_ITERATIONS;
use serde::Deserialize;

/// Configuration for the JIT engine
///
/// Every field has a default, so a partial TOML or JSON table is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    /// Profiled executions before the first compile (default: 1)
    pub compile_threshold: u64,
    /// Executions without a new observed kind before optimizing (default: 2)
    pub stable_executions: u64,
    /// Largest bytecode size, in bytes, that is compiled (default: 16 KiB)
    pub max_unit_size: usize,
    /// Failed compiles of an uncompiled unit before it is marked failed (default: 2)
    pub max_compile_failures: u32,
    /// Block visits before the fixpoint solver gives up
    pub max_iterations: usize,
    /// Run escape analysis; when off every value stays boxed
    pub track_escapes: bool,
    /// Native code budget of the code cache in bytes (default: 64 MiB)
    pub code_cache_size: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            compile_threshold: 1,
            stable_executions: 2,
            max_unit_size: 16 * 1024,
            max_compile_failures: 2,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            track_escapes: true,
            code_cache_size: 64 * 1024 * 1024,
        }
    }
}

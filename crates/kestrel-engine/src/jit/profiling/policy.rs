//! Recompilation policy: decides when a unit is compiled and when its
//! profile is stable enough to optimize
//!
//! The policy only looks at a [`UnitSnapshot`]; it never mutates state.
//! Status transitions are made by the [`PgcController`](super::PgcController).

use super::PgcStatus;

/// Point-in-time view of a unit used for policy decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSnapshot {
    pub status: PgcStatus,
    /// Profiled executions so far
    pub executions: u64,
    /// Executions since the current code was installed
    pub executions_since_compile: u64,
    /// Consecutive executions without a new distinct kind being observed
    pub stable_runs: u64,
    /// Current profile epoch
    pub epoch: u64,
    /// Bytecode size in bytes
    pub code_size: usize,
}

/// Decides when a unit should be (re)compiled
pub trait RecompilePolicy: Send + Sync {
    /// Whether an uncompiled unit should get its first, profiling compile
    fn should_compile(&self, unit: &UnitSnapshot) -> bool;

    /// Whether a profiling-compiled unit should be recompiled as optimized
    fn should_optimize(&self, unit: &UnitSnapshot) -> bool;
}

/// Default policy based on profile stability
#[derive(Debug, Clone)]
pub struct StabilityPolicy {
    /// Profiled executions before the first compile (default: 1)
    pub compile_threshold: u64,
    /// Executions without a new kind before optimizing (default: 2)
    pub stable_executions: u64,
    /// Maximum bytecode size to compile (skip very large units)
    pub max_unit_size: usize,
}

impl StabilityPolicy {
    /// Create a policy with default thresholds
    pub fn new() -> Self {
        StabilityPolicy {
            compile_threshold: 1,
            stable_executions: 2,
            max_unit_size: 16 * 1024,
        }
    }
}

impl Default for StabilityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RecompilePolicy for StabilityPolicy {
    fn should_compile(&self, unit: &UnitSnapshot) -> bool {
        if unit.status != PgcStatus::Uncompiled {
            return false;
        }
        if unit.code_size > self.max_unit_size {
            return false;
        }
        unit.executions >= self.compile_threshold
    }

    fn should_optimize(&self, unit: &UnitSnapshot) -> bool {
        if unit.status != PgcStatus::CompiledWithProfiling {
            return false;
        }
        unit.stable_runs.min(unit.executions_since_compile) >= self.stable_executions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: PgcStatus) -> UnitSnapshot {
        UnitSnapshot {
            status,
            executions: 0,
            executions_since_compile: 0,
            stable_runs: 0,
            epoch: 0,
            code_size: 8,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = StabilityPolicy::new();
        assert_eq!(policy.compile_threshold, 1);
        assert_eq!(policy.stable_executions, 2);
        assert_eq!(policy.max_unit_size, 16384);
    }

    #[test]
    fn test_below_threshold() {
        let policy = StabilityPolicy::new();
        assert!(!policy.should_compile(&snapshot(PgcStatus::Uncompiled)));
    }

    #[test]
    fn test_compile_threshold_reached() {
        let policy = StabilityPolicy::new();
        let unit = UnitSnapshot {
            executions: 1,
            ..snapshot(PgcStatus::Uncompiled)
        };
        assert!(policy.should_compile(&unit));
    }

    #[test]
    fn test_too_large() {
        let policy = StabilityPolicy::new();
        let unit = UnitSnapshot {
            executions: 10,
            code_size: 20_000,
            ..snapshot(PgcStatus::Uncompiled)
        };
        // Hot enough but too large
        assert!(!policy.should_compile(&unit));
    }

    #[test]
    fn test_already_compiled() {
        let policy = StabilityPolicy::new();
        for status in [PgcStatus::CompiledWithProfiling, PgcStatus::Optimized, PgcStatus::Failed] {
            let unit = UnitSnapshot {
                executions: 10,
                ..snapshot(status)
            };
            assert!(!policy.should_compile(&unit));
        }
    }

    #[test]
    fn test_optimize_after_stable_runs() {
        let policy = StabilityPolicy::new();
        let mut unit = UnitSnapshot {
            executions: 5,
            executions_since_compile: 1,
            stable_runs: 1,
            ..snapshot(PgcStatus::CompiledWithProfiling)
        };
        assert!(!policy.should_optimize(&unit));

        unit.executions_since_compile = 2;
        unit.stable_runs = 2;
        assert!(policy.should_optimize(&unit));

        // A new kind resets stability
        unit.stable_runs = 0;
        assert!(!policy.should_optimize(&unit));
    }

    #[test]
    fn test_optimized_is_final() {
        let policy = StabilityPolicy::new();
        let unit = UnitSnapshot {
            executions_since_compile: 100,
            stable_runs: 100,
            ..snapshot(PgcStatus::Optimized)
        };
        assert!(!policy.should_optimize(&unit));
    }
}

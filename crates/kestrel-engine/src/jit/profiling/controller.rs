//! PGC controller: the only writer of a unit's compilation status
//!
//! ```text
//! Uncompiled ──► CompiledWithProfiling ──► Optimized
//!      │                  │                    │
//!      └──────────────────┴────────► Failed ◄──┘
//! ```
//!
//! Callers must hold the unit's compile claim
//! ([`JitUnit::try_start_compile`]) around `on_success` / `on_failure`.

use super::policy::{RecompilePolicy, StabilityPolicy, UnitSnapshot};
use crate::jit::config::JitConfig;
use crate::jit::pipeline::JitError;
use crate::jit::runtime::{CompiledUnitRecord, JitUnit};
use std::fmt;

/// Compilation status of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PgcStatus {
    /// Never compiled; runs in the interpreter with profiling
    Uncompiled = 0,
    /// Compiled from early profile evidence; keeps profiling
    CompiledWithProfiling = 1,
    /// Recompiled from stable evidence
    Optimized = 2,
    /// Compilation cannot succeed; interpreter only
    Failed = 3,
}

impl PgcStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PgcStatus::Uncompiled),
            1 => Some(PgcStatus::CompiledWithProfiling),
            2 => Some(PgcStatus::Optimized),
            3 => Some(PgcStatus::Failed),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PgcStatus::Uncompiled => "uncompiled",
            PgcStatus::CompiledWithProfiling => "compiled-with-profiling",
            PgcStatus::Optimized => "optimized",
            PgcStatus::Failed => "failed",
        }
    }

    /// Whether compiled code exists in this status
    pub fn is_compiled(self) -> bool {
        matches!(self, PgcStatus::CompiledWithProfiling | PgcStatus::Optimized)
    }

    /// Status only moves forward; any non-terminal status may fail
    pub fn can_transition_to(self, next: PgcStatus) -> bool {
        use PgcStatus::*;
        matches!(
            (self, next),
            (Uncompiled, CompiledWithProfiling)
                | (CompiledWithProfiling, Optimized)
                | (Uncompiled | CompiledWithProfiling | Optimized, Failed)
        )
    }
}

impl fmt::Display for PgcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which kind of compile to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// First compile; generated code keeps recording observations
    Profiling,
    /// Recompile from stable evidence; no further profiling
    Optimized,
}

impl Tier {
    /// Status the unit moves to when a compile of this tier succeeds
    pub fn target_status(self) -> PgcStatus {
        match self {
            Tier::Profiling => PgcStatus::CompiledWithProfiling,
            Tier::Optimized => PgcStatus::Optimized,
        }
    }

    /// Whether code compiled at this tier records profile observations
    pub fn profiles(self) -> bool {
        self == Tier::Profiling
    }

    /// Tier whose code was compiled for `status`
    pub fn for_status(status: PgcStatus) -> Option<Tier> {
        match status {
            PgcStatus::CompiledWithProfiling => Some(Tier::Profiling),
            PgcStatus::Optimized => Some(Tier::Optimized),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Profiling => f.write_str("profiling"),
            Tier::Optimized => f.write_str("optimized"),
        }
    }
}

/// Failed compile attempts of one unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileHistory {
    /// Counted failures while uncompiled
    pub failures: u32,
    /// No retry until the profile epoch moves past this value
    pub blocked_epoch: Option<u64>,
    pub last_error: Option<String>,
}

/// Drives per-unit status transitions
pub struct PgcController {
    policy: Box<dyn RecompilePolicy>,
    max_compile_failures: u32,
}

impl PgcController {
    pub fn new(policy: Box<dyn RecompilePolicy>, max_compile_failures: u32) -> Self {
        PgcController {
            policy,
            max_compile_failures: max_compile_failures.max(1),
        }
    }

    /// Controller with the default [`StabilityPolicy`] tuned by `config`
    pub fn from_config(config: &JitConfig) -> Self {
        let policy = StabilityPolicy {
            compile_threshold: config.compile_threshold,
            stable_executions: config.stable_executions,
            max_unit_size: config.max_unit_size,
        };
        Self::new(Box::new(policy), config.max_compile_failures)
    }

    pub fn max_compile_failures(&self) -> u32 {
        self.max_compile_failures
    }

    /// Tier to compile `unit` at now, if any
    pub fn decide(&self, unit: &JitUnit) -> Option<Tier> {
        let snapshot = unit.snapshot();
        if matches!(snapshot.status, PgcStatus::Failed | PgcStatus::Optimized) {
            return None;
        }
        if !self.retry_allowed(unit, &snapshot) {
            return None;
        }
        match snapshot.status {
            PgcStatus::Uncompiled if self.policy.should_compile(&snapshot) => Some(Tier::Profiling),
            PgcStatus::CompiledWithProfiling if self.policy.should_optimize(&snapshot) => {
                Some(Tier::Optimized)
            }
            _ => None,
        }
    }

    fn retry_allowed(&self, unit: &JitUnit, snapshot: &UnitSnapshot) -> bool {
        match unit.history().blocked_epoch {
            Some(blocked) => snapshot.epoch > blocked,
            None => true,
        }
    }

    /// Install freshly compiled code and advance the status
    ///
    /// Returns false if the unit may not move to the tier's status.
    pub fn on_success(&self, unit: &JitUnit, tier: Tier, record: CompiledUnitRecord) -> bool {
        let next = tier.target_status();
        if !self.transition(unit, next) {
            return false;
        }
        let epoch = record.epoch;
        unit.install(record);
        unit.reset_stability(epoch);

        let mut history = unit.history();
        history.blocked_epoch = None;
        history.last_error = None;
        drop(history);

        tracing::debug!(unit = unit.name(), status = %next, "compiled");
        true
    }

    /// Account for a failed compile attempt
    ///
    /// Returns true if the unit was marked failed.
    pub fn on_failure(&self, unit: &JitUnit, tier: Tier, error: &JitError) -> bool {
        let epoch = unit.profile().epoch();
        let status = unit.status();

        let mut history = unit.history();
        history.last_error = Some(error.to_string());

        let fail = if matches!(error, JitError::CacheFull { .. }) {
            // Not the unit's fault; wait for new evidence before trying again
            history.blocked_epoch = Some(epoch);
            false
        } else if error.is_fatal() || status != PgcStatus::Uncompiled {
            true
        } else {
            history.failures += 1;
            history.blocked_epoch = Some(epoch);
            history.failures >= self.max_compile_failures
        };
        let failures = history.failures;
        drop(history);

        if !fail {
            tracing::debug!(
                unit = unit.name(),
                %tier,
                failures,
                error = %error,
                "compile failed; waiting for new profile evidence"
            );
            return false;
        }

        if !self.transition(unit, PgcStatus::Failed) {
            return false;
        }
        unit.install(CompiledUnitRecord::failed(unit.record().generation + 1, epoch));
        tracing::warn!(unit = unit.name(), %tier, error = %error, "unit marked failed");
        true
    }

    fn transition(&self, unit: &JitUnit, next: PgcStatus) -> bool {
        let current = unit.status();
        if !current.can_transition_to(next) {
            tracing::warn!(
                unit = unit.name(),
                from = %current,
                to = %next,
                "rejected status transition"
            );
            return false;
        }
        unit.set_status(next);
        true
    }
}

impl Default for PgcController {
    fn default() -> Self {
        Self::from_config(&JitConfig::default())
    }
}

impl fmt::Debug for PgcController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgcController")
            .field("max_compile_failures", &self.max_compile_failures)
            .finish_non_exhaustive()
    }
}

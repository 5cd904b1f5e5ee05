//! Immutable per-unit compilation record
//!
//! A record is never mutated after it is published. Recompilation builds a
//! new record and swaps it in; frames already running keep the `Arc` they
//! captured at dispatch.

use crate::jit::analysis::Speculation;
use crate::jit::backend::ExecutableCode;
use crate::jit::profiling::{PgcStatus, SitePosition};
use kestrel_bytecode::Kind;
use std::borrow::Cow;

/// Compiled code and metadata for one generation of a unit
#[derive(Debug, Clone)]
pub struct CompiledUnitRecord {
    /// Bumped on every install; 0 for the initial record
    pub generation: u64,
    pub status: PgcStatus,
    pub failed: bool,
    /// Profile epoch the code was compiled against
    pub epoch: u64,
    pub code: Option<ExecutableCode>,
    /// Backend IR, kept for diagnostics
    pub ir: Vec<u8>,
    /// Native code size in bytes
    pub native_size: usize,
    /// Profile-derived assumptions the code depends on
    pub speculations: Vec<Speculation>,
}

impl CompiledUnitRecord {
    /// Record of a unit that has never been compiled
    pub fn uncompiled() -> Self {
        CompiledUnitRecord {
            generation: 0,
            status: PgcStatus::Uncompiled,
            failed: false,
            epoch: 0,
            code: None,
            ir: Vec::new(),
            native_size: 0,
            speculations: Vec::new(),
        }
    }

    pub fn compiled(
        generation: u64,
        status: PgcStatus,
        epoch: u64,
        code: Option<ExecutableCode>,
        ir: Vec<u8>,
        speculations: Vec<Speculation>,
    ) -> Self {
        let native_size = code.as_ref().map_or(0, |code| code.code_size);
        CompiledUnitRecord {
            generation,
            status,
            failed: false,
            epoch,
            code,
            ir,
            native_size,
            speculations,
        }
    }

    /// Terminal record; the unit runs on the interpreter from now on
    pub fn failed(generation: u64, epoch: u64) -> Self {
        CompiledUnitRecord {
            generation,
            status: PgcStatus::Failed,
            failed: true,
            epoch,
            ..Self::uncompiled()
        }
    }

    /// Executable code, if this record may run natively
    pub fn executable(&self) -> Option<&ExecutableCode> {
        if self.failed || !self.status.is_compiled() {
            return None;
        }
        self.code.as_ref()
    }

    /// Whether arguments of these kinds satisfy every argument speculation
    pub fn admits(&self, arg_kinds: &[Option<Kind>]) -> bool {
        self.speculations.iter().all(|speculation| match speculation.site.position {
            SitePosition::Argument(position) => {
                arg_kinds.get(position).copied().flatten() == Some(speculation.kind)
            }
            SitePosition::Stack(_) => true,
        })
    }

    pub fn ir_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.ir)
    }
}

impl Default for CompiledUnitRecord {
    fn default() -> Self {
        Self::uncompiled()
    }
}

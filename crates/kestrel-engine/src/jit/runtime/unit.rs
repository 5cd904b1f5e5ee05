//! Per-unit runtime state of the JIT
//!
//! A `JitUnit` pairs a bytecode unit with its profile store, its PGC status
//! and the currently published [`CompiledUnitRecord`]. It holds the
//! bytecode weakly: the host owns units, and the code cache drops entries
//! whose unit has been destroyed.

use super::record::CompiledUnitRecord;
use crate::jit::profiling::{CompileHistory, PgcStatus, ProfileStore, UnitSnapshot};
use kestrel_bytecode::{BytecodeUnit, UnitId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

pub struct JitUnit {
    id: UnitId,
    name: String,
    code_size: usize,
    unit: Weak<BytecodeUnit>,
    profile: Arc<ProfileStore>,
    /// Written only by the controller while holding the compile claim
    status: AtomicU8,
    compiling: AtomicBool,
    record: RwLock<Arc<CompiledUnitRecord>>,
    history: Mutex<CompileHistory>,
    since_compile: AtomicU64,
    stable_runs: AtomicU64,
    seen_epoch: AtomicU64,
    deopts: AtomicU64,
}

impl JitUnit {
    pub fn new(unit: &Arc<BytecodeUnit>, profile: Arc<ProfileStore>) -> Self {
        let seen_epoch = profile.epoch();
        JitUnit {
            id: unit.id(),
            name: unit.name().to_string(),
            code_size: unit.code_size(),
            unit: Arc::downgrade(unit),
            profile,
            status: AtomicU8::new(PgcStatus::Uncompiled as u8),
            compiling: AtomicBool::new(false),
            record: RwLock::new(Arc::new(CompiledUnitRecord::uncompiled())),
            history: Mutex::new(CompileHistory::default()),
            since_compile: AtomicU64::new(0),
            stable_runs: AtomicU64::new(0),
            seen_epoch: AtomicU64::new(seen_epoch),
            deopts: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bytecode unit, unless the host has destroyed it
    pub fn unit(&self) -> Option<Arc<BytecodeUnit>> {
        self.unit.upgrade()
    }

    pub fn is_live(&self) -> bool {
        self.unit.strong_count() > 0
    }

    pub fn profile(&self) -> &Arc<ProfileStore> {
        &self.profile
    }

    /// Current status; lock-free and possibly one transition stale
    pub fn status(&self) -> PgcStatus {
        PgcStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(PgcStatus::Failed)
    }

    /// Currently published record
    pub fn record(&self) -> Arc<CompiledUnitRecord> {
        Arc::clone(&self.record.read())
    }

    pub fn history(&self) -> MutexGuard<'_, CompileHistory> {
        self.history.lock()
    }

    pub fn deopt_count(&self) -> u64 {
        self.deopts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            status: self.status(),
            executions: self.profile.executions(),
            executions_since_compile: self.since_compile.load(Ordering::Relaxed),
            stable_runs: self.stable_runs.load(Ordering::Relaxed),
            epoch: self.profile.epoch(),
            code_size: self.code_size,
        }
    }

    /// Claim the right to compile this unit; false if another thread holds it
    pub fn try_start_compile(&self) -> bool {
        self.compiling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_compile(&self) {
        self.compiling.store(false, Ordering::Release);
    }

    pub fn is_compiling(&self) -> bool {
        self.compiling.load(Ordering::Acquire)
    }

    /// Count one finished execution toward profile stability
    pub fn note_execution(&self) {
        self.since_compile.fetch_add(1, Ordering::Relaxed);
        let epoch = self.profile.epoch();
        if self.seen_epoch.swap(epoch, Ordering::AcqRel) != epoch {
            self.stable_runs.store(0, Ordering::Relaxed);
        } else {
            self.stable_runs.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn note_deopt(&self) {
        self.deopts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_status(&self, status: PgcStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn install(&self, record: CompiledUnitRecord) {
        *self.record.write() = Arc::new(record);
    }

    pub(crate) fn reset_stability(&self, epoch: u64) {
        self.since_compile.store(0, Ordering::Relaxed);
        self.stable_runs.store(0, Ordering::Relaxed);
        self.seen_epoch.store(epoch, Ordering::Release);
    }
}

impl std::fmt::Debug for JitUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("generation", &self.record().generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::profiling::ProfileSite;
    use kestrel_bytecode::{Kind, UnitBuilder};

    fn make_unit() -> Arc<BytecodeUnit> {
        let mut b = UnitBuilder::new("g");
        b.load_none();
        b.return_value();
        Arc::new(b.build().unwrap())
    }

    #[test]
    fn test_new_unit_is_uncompiled() {
        let unit = make_unit();
        let jit = JitUnit::new(&unit, Arc::new(ProfileStore::new()));
        assert_eq!(jit.id(), unit.id());
        assert_eq!(jit.name(), "g");
        assert_eq!(jit.status(), PgcStatus::Uncompiled);
        assert_eq!(jit.record().generation, 0);
        assert_eq!(jit.snapshot().code_size, unit.code_size());
    }

    #[test]
    fn test_compile_claim_is_exclusive() {
        let unit = make_unit();
        let jit = JitUnit::new(&unit, Arc::new(ProfileStore::new()));
        assert!(jit.try_start_compile());
        assert!(!jit.try_start_compile());
        jit.finish_compile();
        assert!(jit.try_start_compile());
    }

    #[test]
    fn test_stability_counting() {
        let unit = make_unit();
        let jit = JitUnit::new(&unit, Arc::new(ProfileStore::new()));
        jit.note_execution();
        jit.note_execution();
        assert_eq!(jit.snapshot().stable_runs, 2);

        jit.profile().record(ProfileSite::stack(0, 0), Kind::Integer);
        jit.note_execution();
        let snapshot = jit.snapshot();
        assert_eq!(snapshot.stable_runs, 0);
        assert_eq!(snapshot.executions_since_compile, 3);

        jit.reset_stability(snapshot.epoch);
        assert_eq!(jit.snapshot().executions_since_compile, 0);
    }

    #[test]
    fn test_weak_unit_reference() {
        let unit = make_unit();
        let jit = JitUnit::new(&unit, Arc::new(ProfileStore::new()));
        assert!(jit.is_live());
        drop(unit);
        assert!(!jit.is_live());
        assert!(jit.unit().is_none());
    }
}

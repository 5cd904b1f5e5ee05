//! Code cache for JIT units
//!
//! Maps each bytecode unit to its [`JitUnit`], created lazily on first
//! dispatch, and accounts the native code size of every published record
//! against a fixed budget.

use super::unit::JitUnit;
use crate::jit::profiling::ProfileStore;
use kestrel_bytecode::{BytecodeUnit, UnitId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Thread-safe cache of per-unit JIT state
pub struct CodeCache {
    /// Unit id → runtime state
    entries: RwLock<FxHashMap<UnitId, Arc<JitUnit>>>,
    /// Total size of all published native code
    total_code_size: AtomicUsize,
    /// Maximum allowed total code size
    max_size: usize,
}

impl CodeCache {
    /// Create a new code cache with a maximum size limit (in bytes)
    pub fn new(max_size: usize) -> Self {
        CodeCache {
            entries: RwLock::new(FxHashMap::default()),
            total_code_size: AtomicUsize::new(0),
            max_size,
        }
    }

    /// Runtime state for `unit`, creating it on first use
    pub fn get_or_insert(
        &self,
        unit: &Arc<BytecodeUnit>,
        profile: impl FnOnce() -> Arc<ProfileStore>,
    ) -> Arc<JitUnit> {
        if let Some(entry) = self.entries.read().get(&unit.id()) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write();
        let entry = entries
            .entry(unit.id())
            .or_insert_with(|| Arc::new(JitUnit::new(unit, profile())));
        Arc::clone(entry)
    }

    pub fn get(&self, id: UnitId) -> Option<Arc<JitUnit>> {
        self.entries.read().get(&id).cloned()
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Drop a unit's entry and release its code size
    ///
    /// Frames already running keep their captured record alive.
    pub fn evict(&self, id: UnitId) -> Option<Arc<JitUnit>> {
        let removed = self.entries.write().remove(&id)?;
        self.release(removed.record().native_size);
        Some(removed)
    }

    /// Evict every entry whose bytecode unit has been destroyed
    pub fn purge_dead(&self) -> usize {
        let mut entries = self.entries.write();
        let dead: Vec<UnitId> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            if let Some(entry) = entries.remove(id) {
                self.release(entry.record().native_size);
            }
        }
        if !dead.is_empty() {
            tracing::debug!(purged = dead.len(), "purged dead units from code cache");
        }
        dead.len()
    }

    /// Account for replacing `old` bytes of code with `new` bytes
    ///
    /// Returns false if the cache would exceed its budget.
    pub fn try_reserve(&self, old: usize, new: usize) -> bool {
        self.total_code_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.saturating_sub(old) + new;
                (next <= self.max_size).then_some(next)
            })
            .is_ok()
    }

    /// Undo a successful `try_reserve(old, new)`
    ///
    /// Always restores `old`, even if other reservations have since filled
    /// the budget.
    pub fn rollback(&self, old: usize, new: usize) {
        let _ = self
            .total_code_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(new) + old)
            });
    }

    pub fn release(&self, size: usize) {
        let _ = self
            .total_code_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(size))
            });
    }

    /// Bytes still available for native code
    pub fn available(&self) -> usize {
        self.max_size.saturating_sub(self.total_size())
    }

    /// Total size of cached code
    pub fn total_size(&self) -> usize {
        self.total_code_size.load(Ordering::Acquire)
    }

    /// Number of cached units (compiled or not)
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Every cached unit, in id order
    pub fn units(&self) -> Vec<Arc<JitUnit>> {
        let mut units: Vec<_> = self.entries.read().values().cloned().collect();
        units.sort_by_key(|unit| unit.id());
        units
    }
}

impl std::fmt::Debug for CodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeCache")
            .field("entries", &self.entry_count())
            .field("total_size", &self.total_size())
            .field("max_size", &self.max_size)
            .finish()
    }
}

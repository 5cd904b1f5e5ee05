//! Abstract frame state: operand stack and locals with provenance

use super::AnalysisError;
use crate::jit::analysis::lattice::{AbstractValue, LocalInfo};
use std::collections::BTreeSet;
use std::fmt;

/// An abstract operand-stack slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub value: AbstractValue,
    /// Instructions whose result may occupy this slot
    pub sources: BTreeSet<usize>,
}

impl StackEntry {
    /// Value produced by instruction `index`
    pub fn produced(value: AbstractValue, index: usize) -> Self {
        StackEntry {
            value,
            sources: BTreeSet::from([index]),
        }
    }

    /// Value with no producer inside the unit
    pub fn external(value: AbstractValue) -> Self {
        StackEntry {
            value,
            sources: BTreeSet::new(),
        }
    }

    fn join_from(&mut self, other: &StackEntry) -> bool {
        let value = self.value.join(other.value);
        let before = self.sources.len();
        self.sources.extend(other.sources.iter().copied());
        let changed = value != self.value || self.sources.len() != before;
        self.value = value;
        changed
    }
}

/// An abstract local-variable slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub info: LocalInfo,
    /// `StoreFast` instructions whose value may be held here
    pub stores: BTreeSet<usize>,
    /// Whether the argument passed at entry may still be held here
    pub from_entry: bool,
}

impl LocalEntry {
    pub fn unassigned() -> Self {
        LocalEntry {
            info: LocalInfo::undefined(),
            stores: BTreeSet::new(),
            from_entry: false,
        }
    }

    pub fn argument(value: AbstractValue) -> Self {
        LocalEntry {
            info: LocalInfo::defined(value),
            stores: BTreeSet::new(),
            from_entry: true,
        }
    }

    pub fn stored(value: AbstractValue, index: usize) -> Self {
        LocalEntry {
            info: LocalInfo::defined(value),
            stores: BTreeSet::from([index]),
            from_entry: false,
        }
    }

    fn join_from(&mut self, other: &LocalEntry) -> bool {
        let info = self.info.join(other.info);
        let before = self.stores.len();
        self.stores.extend(other.stores.iter().copied());
        let from_entry = self.from_entry || other.from_entry;
        let changed =
            info != self.info || self.stores.len() != before || from_entry != self.from_entry;
        self.info = info;
        self.from_entry = from_entry;
        changed
    }
}

/// Abstract state of a frame just before an instruction executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameState {
    /// Operand stack, bottom first
    pub stack: Vec<StackEntry>,
    pub locals: Vec<LocalEntry>,
}

impl FrameState {
    /// State with an empty stack and every local unassigned
    pub fn new(local_count: usize) -> Self {
        FrameState {
            stack: Vec::new(),
            locals: vec![LocalEntry::unassigned(); local_count],
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, entry: StackEntry) {
        self.stack.push(entry);
    }

    pub fn pop(&mut self, index: usize) -> Result<StackEntry, AnalysisError> {
        self.stack
            .pop()
            .ok_or(AnalysisError::StackUnderflow { index })
    }

    /// Pop `count` entries, returned bottom first
    pub fn pop_n(&mut self, count: usize, index: usize) -> Result<Vec<StackEntry>, AnalysisError> {
        if self.stack.len() < count {
            return Err(AnalysisError::StackUnderflow { index });
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    /// Entry `depth` slots below the top (0 = top of stack)
    pub fn peek(&self, depth: usize) -> Option<&StackEntry> {
        self.stack.len().checked_sub(depth + 1).map(|i| &self.stack[i])
    }

    pub fn peek_mut(&mut self, depth: usize) -> Option<&mut StackEntry> {
        let len = self.stack.len();
        len.checked_sub(depth + 1).map(move |i| &mut self.stack[i])
    }

    /// Slot-wise join of `other` into `self`; returns whether anything changed
    ///
    /// `index` is the instruction the merge happens at, reported when the
    /// stack depths disagree.
    pub fn join_from(&mut self, other: &FrameState, index: usize) -> Result<bool, AnalysisError> {
        if self.stack.len() != other.stack.len() || self.locals.len() != other.locals.len() {
            return Err(AnalysisError::StackMismatch { index });
        }
        let mut changed = false;
        for (slot, incoming) in self.stack.iter_mut().zip(&other.stack) {
            changed |= slot.join_from(incoming);
        }
        for (slot, incoming) in self.locals.iter_mut().zip(&other.locals) {
            changed |= slot.join_from(incoming);
        }
        Ok(changed)
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, entry) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", entry.value)?;
        }
        f.write_str("] {")?;
        for (i, local) in self.locals.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", i, local.info)?;
        }
        f.write_str("}")
    }
}

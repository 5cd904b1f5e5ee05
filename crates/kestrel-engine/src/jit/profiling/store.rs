//! Per-unit runtime type profile
//!
//! Executions record the kind of each profiled operand. Repeated
//! observations of a kind at a site are coalesced into a hit count. The
//! store is shared between executing threads and the compiler, so all
//! access goes through one lock per unit; a recorded observation is never
//! lost and readers never see a partial site.

use crate::jit::analysis::{AbstractValue, TypeFeedback};
use kestrel_bytecode::Kind;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinct kinds kept per site before it is marked megamorphic
pub const MAX_KINDS_PER_SITE: usize = 4;

/// Where at an instruction a kind is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SitePosition {
    /// Operand position counted from the top of the stack
    Stack(usize),
    /// Argument value at unit entry
    Argument(usize),
}

/// A profiled location in a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProfileSite {
    pub index: usize,
    pub position: SitePosition,
}

impl ProfileSite {
    /// Operand `position` of instruction `index`
    pub fn stack(index: usize, position: usize) -> Self {
        ProfileSite {
            index,
            position: SitePosition::Stack(position),
        }
    }

    /// Argument `arg` at entry
    pub fn argument(arg: usize) -> Self {
        ProfileSite {
            index: 0,
            position: SitePosition::Argument(arg),
        }
    }
}

impl fmt::Display for ProfileSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            SitePosition::Stack(position) => write!(f, "{}:s{}", self.index, position),
            SitePosition::Argument(arg) => write!(f, "arg{}", arg),
        }
    }
}

/// Observations at one site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SiteProfile {
    /// Distinct kinds with their hit counts, in first-seen order
    pub kinds: Vec<(Kind, u64)>,
    /// More than [`MAX_KINDS_PER_SITE`] distinct kinds were seen
    pub megamorphic: bool,
    /// Total observations
    pub hits: u64,
}

impl SiteProfile {
    /// Join of the observed kinds
    pub fn value(&self) -> AbstractValue {
        if self.megamorphic {
            return AbstractValue::Top;
        }
        AbstractValue::from_kinds(self.kinds.iter().map(|&(kind, _)| kind))
    }
}

/// Thread-safe type profile of one bytecode unit
#[derive(Debug, Default)]
pub struct ProfileStore {
    sites: Mutex<FxHashMap<ProfileSite, SiteProfile>>,
    /// Distinct (site, kind) discoveries
    epoch: AtomicU64,
    /// Profiled executions
    executions: AtomicU64,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation; returns true if the kind is new at this site
    pub fn record(&self, site: ProfileSite, kind: Kind) -> bool {
        let mut sites = self.sites.lock();
        let profile = sites.entry(site).or_default();
        profile.hits += 1;

        if let Some(entry) = profile.kinds.iter_mut().find(|(k, _)| *k == kind) {
            entry.1 += 1;
            return false;
        }
        if profile.kinds.len() < MAX_KINDS_PER_SITE {
            profile.kinds.push((kind, 1));
        } else if !profile.megamorphic {
            profile.megamorphic = true;
        } else {
            return false;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Distinct kinds observed at `site`, in kind order
    pub fn kinds_at(&self, site: ProfileSite) -> Vec<Kind> {
        let sites = self.sites.lock();
        let mut kinds: Vec<Kind> = sites
            .get(&site)
            .map(|profile| profile.kinds.iter().map(|&(kind, _)| kind).collect())
            .unwrap_or_default();
        kinds.sort_unstable();
        kinds
    }

    /// Hits for `kind` at `site`
    pub fn hits_at(&self, site: ProfileSite, kind: Kind) -> u64 {
        self.sites
            .lock()
            .get(&site)
            .and_then(|profile| profile.kinds.iter().find(|(k, _)| *k == kind))
            .map_or(0, |&(_, hits)| hits)
    }

    pub fn is_megamorphic(&self, site: ProfileSite) -> bool {
        self.sites
            .lock()
            .get(&site)
            .is_some_and(|profile| profile.megamorphic)
    }

    /// The single kind seen at `site`, if exactly one was
    pub fn monomorphic_kind(&self, site: ProfileSite) -> Option<Kind> {
        self.sites
            .lock()
            .get(&site)
            .and_then(|profile| profile.value().concrete_kind())
    }

    /// Copy of every site, ordered by site
    pub fn snapshot(&self) -> Vec<(ProfileSite, SiteProfile)> {
        let mut sites: Vec<_> = self
            .sites
            .lock()
            .iter()
            .map(|(site, profile)| (*site, profile.clone()))
            .collect();
        sites.sort_by_key(|(site, _)| *site);
        sites
    }

    pub fn site_count(&self) -> usize {
        self.sites.lock().len()
    }

    /// Count of distinct (site, kind) discoveries so far
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Count one profiled execution, returning the new total
    pub fn record_execution(&self) -> u64 {
        self.executions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }
}

impl TypeFeedback for ProfileStore {
    fn observed(&self, site: ProfileSite) -> AbstractValue {
        self.sites
            .lock()
            .get(&site)
            .map_or(AbstractValue::Bottom, SiteProfile::value)
    }
}

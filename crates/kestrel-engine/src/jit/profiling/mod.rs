//! Runtime type profiling and the profile-guided compilation loop

pub mod controller;
pub mod policy;
pub mod store;

pub use controller::{CompileHistory, PgcController, PgcStatus, Tier};
pub use policy::{RecompilePolicy, StabilityPolicy, UnitSnapshot};
pub use store::{ProfileSite, ProfileStore, SitePosition, SiteProfile, MAX_KINDS_PER_SITE};

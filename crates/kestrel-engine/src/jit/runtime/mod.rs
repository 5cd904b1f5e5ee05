//! JIT runtime state: compiled-unit records, per-unit state and the cache

pub mod code_cache;
pub mod record;
pub mod unit;

pub use code_cache::CodeCache;
pub use record::CompiledUnitRecord;
pub use unit::JitUnit;

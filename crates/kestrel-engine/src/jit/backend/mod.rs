//! Backend-agnostic code generation traits and implementations

pub mod stub;
pub mod traits;

pub use stub::StubBackend;
pub use traits::{
    CodegenBackend, CodegenError, CompilationInput, CompiledCode, CompiledEntry, ExecutableCode,
    TargetArch, TargetInfo,
};

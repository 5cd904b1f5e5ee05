//! Stub backend for running the pipeline without real codegen
//!
//! Emits one placeholder trap byte (INT3 / BRK) per reachable instruction
//! and a textual plan of the escape-annotated graph as IR. Its entry point
//! runs the unit on the host interpreter, so compiled dispatch is
//! observably identical to the fallback path.

use super::traits::*;
use crate::jit::profiling::ProfileStore;
use crate::vm::{Frame, Interpreter, Namespace, ReferenceInterpreter, RuntimeError, Value};
use std::fmt::Write;
use std::sync::Arc;

/// A stub backend that produces placeholder code (INT3 on x86, BRK on ARM)
#[derive(Clone)]
pub struct StubBackend {
    interpreter: Arc<dyn Interpreter>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_interpreter(Arc::new(ReferenceInterpreter))
    }

    /// Stub whose entry points run on `interpreter`
    pub fn with_interpreter(interpreter: Arc<dyn Interpreter>) -> Self {
        StubBackend { interpreter }
    }

    fn trap_byte(&self) -> u8 {
        match self.target_info().arch {
            TargetArch::X86_64 => 0xCC,  // INT3
            TargetArch::AArch64 => 0x00, // BRK #0 (placeholder)
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct StubEntry {
    interpreter: Arc<dyn Interpreter>,
}

impl CompiledEntry for StubEntry {
    fn invoke(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
        profile: Option<&ProfileStore>,
    ) -> Result<Value, RuntimeError> {
        self.interpreter.interpret(frame, namespace, profile)
    }
}

/// Text listing of the plan the code would implement
fn render_ir(input: &CompilationInput<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "unit {} tier {}", input.unit.name(), input.tier);
    for speculation in input.states.speculations() {
        let _ = writeln!(out, "guard {} {}", speculation.site, speculation.kind);
    }
    for node in input.graph.nodes() {
        if !node.reachable {
            continue;
        }
        let repr = match node.unboxed {
            Some(kind) => format!("unboxed {}", kind),
            None => "boxed".to_string(),
        };
        let _ = writeln!(out, "{:>4} {} {} ; {}", node.index, node.opcode, node.arg, repr);
    }
    out
}

impl CodegenBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn compile_unit(&self, input: &CompilationInput<'_>) -> Result<CompiledCode, CodegenError> {
        let reachable = input.graph.nodes().iter().filter(|node| node.reachable).count();
        Ok(CompiledCode {
            code: vec![self.trap_byte(); reachable.max(1)],
            entry_offset: 0,
            ir: render_ir(input).into_bytes(),
        })
    }

    fn finalize(&self, code: &mut CompiledCode) -> Result<ExecutableCode, CodegenError> {
        if code.entry_offset >= code.code.len() {
            return Err(CodegenError::BackendError(format!(
                "entry offset {} outside {} code bytes",
                code.entry_offset,
                code.code.len()
            )));
        }
        Ok(ExecutableCode {
            code: Arc::from(code.code.as_slice()),
            code_size: code.code.len(),
            entry_offset: code.entry_offset,
            entry: Arc::new(StubEntry {
                interpreter: Arc::clone(&self.interpreter),
            }),
        })
    }

    fn target_info(&self) -> TargetInfo {
        #[cfg(target_arch = "x86_64")]
        { TargetInfo { arch: TargetArch::X86_64, pointer_size: 8 } }

        #[cfg(target_arch = "aarch64")]
        { TargetInfo { arch: TargetArch::AArch64, pointer_size: 8 } }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        { TargetInfo { arch: TargetArch::X86_64, pointer_size: 8 } }
    }
}

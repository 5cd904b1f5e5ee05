//! `kestrel analyze`: print the inferred state before every instruction.

use super::{kinds, load_unit, KindArg};
use crate::output::StyledOutput;
use kestrel_engine::jit::backend::StubBackend;
use kestrel_engine::{JitConfig, JitPipeline};
use std::path::Path;

pub fn execute(
    file: &Path,
    arg_kinds: &[KindArg],
    config: &JitConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let unit = load_unit(file)?;
    let pipeline = JitPipeline::new(StubBackend::new());
    let analysis = pipeline.analyze(&unit, &kinds(arg_kinds), None, config)?;
    let states = &analysis.states;

    out.bold(&format!("unit {}", unit.name()));
    out.newline();
    for (index, instr) in unit.instructions().iter().enumerate() {
        out.plain(&format!("{:>4} {}", index, instr));
        match states.state(index) {
            Some(state) => {
                out.dim(&format!("  {}", state));
                if let Some(kind) = analysis.graph.node(index).and_then(|node| node.unboxed) {
                    out.success(&format!("  unboxed {}", kind));
                }
            }
            None => out.warning("  unreachable"),
        }
        out.newline();
    }

    out.newline();
    out.info("returns");
    out.plain(&format!("     {}", states.return_kind()));
    out.newline();
    out.info("iterations");
    out.plain(&format!("  {}", states.iterations()));
    out.newline();
    out.info("unboxed");
    out.plain(&format!("     {}/{}", analysis.graph.unboxed_count(), analysis.graph.len()));
    out.newline();
    out.flush();
    Ok(())
}

//! `kestrel graph`: render the escape-annotated instruction graph as DOT.

use super::{kinds, load_unit, KindArg};
use crate::output::StyledOutput;
use anyhow::Context;
use kestrel_engine::jit::backend::StubBackend;
use kestrel_engine::{JitConfig, JitPipeline};
use std::path::Path;

pub fn execute(
    file: &Path,
    arg_kinds: &[KindArg],
    output: Option<&Path>,
    config: &JitConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let unit = load_unit(file)?;
    let pipeline = JitPipeline::new(StubBackend::new());
    let analysis = pipeline.analyze(&unit, &kinds(arg_kinds), None, config)?;
    let dot = analysis.graph.render(unit.name());

    match output {
        Some(path) => {
            std::fs::write(path, &dot)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            out.success("Wrote");
            out.plain(&format!(" {}", path.display()));
            out.newline();
        }
        None => out.plain(&dot),
    }
    out.flush();
    Ok(())
}

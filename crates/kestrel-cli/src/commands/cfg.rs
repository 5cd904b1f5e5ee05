//! `kestrel cfg`: print the control-flow graph of a unit.

use super::load_unit;
use crate::output::StyledOutput;
use kestrel_engine::build_cfg;
use std::path::Path;

pub fn execute(file: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let unit = load_unit(file)?;
    let cfg = build_cfg(&unit)?;

    out.bold(&format!("unit {} ({} blocks)", unit.name(), cfg.block_count()));
    out.newline();
    for block in &cfg.blocks {
        out.info(&block.id.to_string());
        out.plain(&format!(" [{}..{})", block.start, block.end));
        if let Some(handler) = &block.handler {
            out.dim(&format!(" handler -> {}", handler.target));
        }
        out.newline();
        for index in block.range() {
            out.plain(&format!("    {:>4} {}", index, unit.instructions()[index]));
            out.newline();
        }
        for edge in cfg.successors(block.id) {
            out.dim(&format!("    -> {} ({:?})", edge.to, edge.kind));
            out.newline();
        }
        if block.terminator.is_exit() {
            out.dim(&format!("    exit ({:?})", block.terminator));
            out.newline();
        }
    }
    out.flush();
    Ok(())
}

//! `kestrel encode`: write a JSON unit in its binary encoding.

use super::load_unit;
use crate::output::StyledOutput;
use anyhow::Context;
use std::path::Path;

pub fn execute(file: &Path, output: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let unit = load_unit(file)?;
    let bytes = unit.encode();
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    out.success("Encoded");
    out.plain(&format!(" {} -> {} ({} bytes)", unit.name(), output.display(), bytes.len()));
    out.newline();
    out.flush();
    Ok(())
}

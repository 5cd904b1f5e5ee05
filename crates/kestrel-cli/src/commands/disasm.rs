//! `kestrel disasm`: print a unit's instructions and handlers.

use super::load_unit;
use crate::output::StyledOutput;
use std::path::Path;

pub fn execute(file: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let unit = load_unit(file)?;
    let listing = unit.disassemble();
    let mut lines = listing.lines();
    if let Some(header) = lines.next() {
        out.bold(header);
        out.newline();
    }
    for line in lines {
        if line.starts_with("handler") {
            out.dim(line);
        } else {
            out.plain(line);
        }
        out.newline();
    }
    out.flush();
    Ok(())
}

//! Graphviz rendering of the instruction graph

use super::{EdgeSlot, EscapeTransition, InstructionGraph};
use std::fmt::Write;

impl InstructionGraph {
    /// Render as a Graphviz `digraph` named `name`
    ///
    /// Nodes are clustered by basic block. Escaping nodes are drawn filled,
    /// unreachable ones dashed. Edge labels carry the slot, the inferred
    /// value and the escape transition.
    pub fn render(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape_label(name));
        let _ = writeln!(out, "    node [shape=box, fontname=\"monospace\"];");

        let mut current_block = None;
        for node in self.nodes() {
            if current_block != Some(node.block) {
                if current_block.is_some() {
                    let _ = writeln!(out, "    }}");
                }
                let _ = writeln!(out, "    subgraph cluster_{} {{", node.block.0);
                let _ = writeln!(out, "        label=\"{}\";", node.block);
                current_block = Some(node.block);
            }

            let repr = match node.unboxed {
                Some(kind) => format!("unboxed {}", kind),
                None => "boxed".to_string(),
            };
            let style = if !node.reachable {
                ", style=dashed"
            } else if node.escapes {
                ", style=filled, fillcolor=lightgrey"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "        n{} [label=\"{}: {} {}\\n{}\"{}];",
                node.index, node.index, node.opcode, node.arg, repr, style
            );
        }
        if current_block.is_some() {
            let _ = writeln!(out, "    }}");
        }

        for edge in self.edges() {
            let slot = match edge.slot {
                EdgeSlot::Stack(position) => format!("s{}", position),
                EdgeSlot::Local(local) => format!("l{}", local),
            };
            let style = match edge.transition {
                EscapeTransition::NoEscape => "solid",
                EscapeTransition::Box | EscapeTransition::Unbox => "dashed",
                EscapeTransition::Escaped => "bold",
            };
            let _ = writeln!(
                out,
                "    n{} -> n{} [label=\"{} {} {}\", style={}];",
                edge.from,
                edge.to,
                slot,
                edge.value,
                edge.transition.name(),
                style
            );
        }

        out.push_str("}\n");
        out
    }
}

fn escape_label(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

//! Instruction dependency graph with escape classification
//!
//! Nodes are instructions; an edge runs from the instruction that produced
//! a value to each instruction that consumes it, through the operand stack
//! or through a local variable. Every node is assigned a representation:
//! unboxed (operates on a native machine value) or boxed. Each edge's
//! [`EscapeTransition`] follows from the representations of its two ends.

mod escape;
mod render;

pub use escape::build_graph;

use crate::jit::analysis::{AbstractValue, BlockId};
use kestrel_bytecode::{Kind, Opcode};

/// How a value crosses a producer → consumer edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeTransition {
    /// Unboxed on both sides
    NoEscape,
    /// Producer computes natively; the value is boxed on the edge
    Box,
    /// Producer yields a boxed value the consumer unboxes under a guard
    Unbox,
    /// Boxed on both sides
    Escaped,
}

impl EscapeTransition {
    /// Transition between a producer and consumer representation
    pub fn between(producer_unboxed: bool, consumer_unboxed: bool) -> Self {
        match (producer_unboxed, consumer_unboxed) {
            (true, true) => EscapeTransition::NoEscape,
            (true, false) => EscapeTransition::Box,
            (false, true) => EscapeTransition::Unbox,
            (false, false) => EscapeTransition::Escaped,
        }
    }

    /// Whether the value leaves its producer boxed
    pub fn escapes(self) -> bool {
        matches!(self, EscapeTransition::Unbox | EscapeTransition::Escaped)
    }

    pub fn name(self) -> &'static str {
        match self {
            EscapeTransition::NoEscape => "no-escape",
            EscapeTransition::Box => "box",
            EscapeTransition::Unbox => "unbox",
            EscapeTransition::Escaped => "escaped",
        }
    }
}

/// Channel an edge's value travels through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeSlot {
    /// Consumer operand position (0 = top of stack)
    Stack(usize),
    /// Local variable, from a store to a load
    Local(usize),
}

/// A producer → consumer edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub slot: EdgeSlot,
    /// Inferred value as the consumer sees it
    pub value: AbstractValue,
    pub transition: EscapeTransition,
}

impl GraphEdge {
    pub fn escapes(&self) -> bool {
        self.transition.escapes()
    }
}

/// An instruction node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub index: usize,
    pub opcode: Opcode,
    pub arg: u32,
    pub block: BlockId,
    pub reachable: bool,
    /// Native kind the instruction operates on, `None` when boxed
    pub unboxed: Option<Kind>,
    /// The produced value cannot be kept unboxed
    pub escapes: bool,
}

/// Escape-annotated instruction graph of one unit
#[derive(Debug, Clone)]
pub struct InstructionGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
}

impl InstructionGraph {
    pub(crate) fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Self {
        let mut incoming = vec![Vec::new(); nodes.len()];
        let mut outgoing = vec![Vec::new(); nodes.len()];
        for (i, edge) in edges.iter().enumerate() {
            outgoing[edge.from].push(i);
            incoming[edge.to].push(i);
        }
        InstructionGraph {
            nodes,
            edges,
            incoming,
            outgoing,
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Edges into instruction `index`
    pub fn edges_in(&self, index: usize) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.incoming
            .get(index)
            .into_iter()
            .flatten()
            .map(move |&e| &self.edges[e])
    }

    /// Edges out of instruction `index`
    pub fn edges_out(&self, index: usize) -> impl Iterator<Item = &GraphEdge> + '_ {
        self.outgoing
            .get(index)
            .into_iter()
            .flatten()
            .map(move |&e| &self.edges[e])
    }

    /// First edge feeding operand `position` of instruction `index`
    ///
    /// Positions with several producers (after a merge) have one edge per
    /// producer, ordered by producer index.
    pub fn edge_in(&self, index: usize, position: usize) -> Option<&GraphEdge> {
        self.edges_in(index)
            .find(|edge| edge.slot == EdgeSlot::Stack(position))
    }

    /// The `n`th edge out of instruction `index`
    pub fn edge_out(&self, index: usize, n: usize) -> Option<&GraphEdge> {
        self.edges_out(index).nth(n)
    }

    /// Number of reachable nodes operating on unboxed values
    pub fn unboxed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.reachable && node.unboxed.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(EscapeTransition::between(true, true), EscapeTransition::NoEscape);
        assert_eq!(EscapeTransition::between(true, false), EscapeTransition::Box);
        assert_eq!(EscapeTransition::between(false, true), EscapeTransition::Unbox);
        assert_eq!(EscapeTransition::between(false, false), EscapeTransition::Escaped);

        assert!(!EscapeTransition::NoEscape.escapes());
        assert!(!EscapeTransition::Box.escapes());
        assert!(EscapeTransition::Unbox.escapes());
        assert!(EscapeTransition::Escaped.escapes());
    }
}

//! Control-flow graph construction from a bytecode unit
//!
//! Splits the instruction stream into basic blocks and connects them with
//! typed edges. Blocks are also split at exception-region boundaries so that
//! every instruction in a block shares the same innermost handler, which
//! gives each protected block a single exception edge to its handler entry.

use kestrel_bytecode::{verify_unit, BytecodeUnit, ExceptionHandler, Opcode, VerifyError};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;

/// Control-flow construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CfgError {
    /// Structurally malformed unit
    #[error("Invalid unit: {0}")]
    InvalidUnit(#[from] VerifyError),
}

/// Unique identifier for a basic block in the CFG
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Pseudo-block for control running off the end of the unit
    pub const EXIT: BlockId = BlockId(u32::MAX);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Why control moves along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Straight-line continuation into the next block
    FallThrough,
    /// Jump or taken conditional branch
    BranchTaken,
    /// Untaken conditional branch
    BranchNotTaken,
    /// Multi-way dispatch to jump-table entry `n`
    Case(usize),
    /// Raised exception to the innermost handler
    Exception,
}

/// A directed CFG edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// How a basic block terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgTerminator {
    /// Falls through to the next block
    Fallthrough(BlockId),
    /// Unconditional jump
    Jump(BlockId),
    /// Two-way conditional branch ended by `opcode`
    Branch {
        opcode: Opcode,
        taken: BlockId,
        not_taken: BlockId,
    },
    /// `Switch` over a jump table, falling through to `default`
    Switch {
        targets: Vec<BlockId>,
        default: BlockId,
    },
    /// `ReturnValue`
    Return,
    /// `RaiseVarargs` / `Reraise`
    Raise,
    /// Control runs off the end of the unit (implicit `return None`)
    FallOff,
}

impl CfgTerminator {
    /// Whether the block leaves the frame
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            CfgTerminator::Return | CfgTerminator::Raise | CfgTerminator::FallOff
        )
    }
}

/// A basic block
#[derive(Debug, Clone)]
pub struct CfgBlock {
    pub id: BlockId,
    /// First instruction index
    pub start: usize,
    /// One past the last instruction index
    pub end: usize,
    pub terminator: CfgTerminator,
    /// Innermost handler protecting every instruction of this block
    pub handler: Option<ExceptionHandler>,
    pub predecessors: Vec<BlockId>,
}

impl CfgBlock {
    /// Instruction indices in this block
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A control-flow graph over one bytecode unit
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub blocks: Vec<CfgBlock>,
    pub entry: BlockId,
    edges: Vec<CfgEdge>,
    /// Outgoing edge indices per block
    outgoing: Vec<Vec<usize>>,
    /// Block containing each instruction
    block_of: Vec<BlockId>,
}

/// Build a control-flow graph, verifying the unit first
pub fn build_cfg(unit: &BytecodeUnit) -> Result<ControlFlowGraph, CfgError> {
    verify_unit(unit)?;

    let len = unit.len();
    if len == 0 {
        return Ok(ControlFlowGraph {
            blocks: vec![CfgBlock {
                id: BlockId(0),
                start: 0,
                end: 0,
                terminator: CfgTerminator::FallOff,
                handler: None,
                predecessors: vec![],
            }],
            entry: BlockId(0),
            edges: vec![],
            outgoing: vec![vec![]],
            block_of: vec![],
        });
    }

    // Step 1: Collect block boundaries
    let starts = collect_block_starts(unit);
    let sorted: Vec<usize> = starts.into_iter().filter(|&s| s < len).collect();
    let start_to_block: FxHashMap<usize, BlockId> = sorted
        .iter()
        .enumerate()
        .map(|(idx, &start)| (start, BlockId(idx as u32)))
        .collect();

    // Step 2: Create blocks
    let mut blocks: Vec<CfgBlock> = sorted
        .iter()
        .enumerate()
        .map(|(idx, &start)| {
            let end = sorted.get(idx + 1).copied().unwrap_or(len);
            CfgBlock {
                id: BlockId(idx as u32),
                start,
                end,
                terminator: CfgTerminator::FallOff,
                handler: unit.handler_for(start).copied(),
                predecessors: vec![],
            }
        })
        .collect();

    let mut block_of = Vec::with_capacity(len);
    for block in &blocks {
        block_of.extend(std::iter::repeat(block.id).take(block.end - block.start));
    }

    // Step 3: Terminators
    let lookup = |index: usize| start_to_block[&index];
    for block in &mut blocks {
        let last = &unit.instructions()[block.end - 1];
        let next = (block.end < len).then(|| lookup(block.end));
        let fallthrough = |next: Option<BlockId>| match next {
            Some(b) => CfgTerminator::Fallthrough(b),
            None => CfgTerminator::FallOff,
        };

        block.terminator = match last.opcode {
            Opcode::JumpForward | Opcode::JumpAbsolute => {
                CfgTerminator::Jump(lookup(last.arg as usize))
            }
            op if op.is_conditional_branch() => match next {
                Some(not_taken) => CfgTerminator::Branch {
                    opcode: op,
                    taken: lookup(last.arg as usize),
                    not_taken,
                },
                // Untaken side of a trailing branch falls off the unit
                None => CfgTerminator::Branch {
                    opcode: op,
                    taken: lookup(last.arg as usize),
                    not_taken: BlockId::EXIT,
                },
            },
            Opcode::Switch => {
                let table = unit.jump_table(last.arg as usize).unwrap_or(&[]);
                CfgTerminator::Switch {
                    targets: table.iter().map(|&t| lookup(t)).collect(),
                    default: next.unwrap_or(BlockId::EXIT),
                }
            }
            Opcode::ReturnValue => CfgTerminator::Return,
            Opcode::RaiseVarargs | Opcode::Reraise => CfgTerminator::Raise,
            _ => fallthrough(next),
        };
    }

    // Step 4: Edges and predecessor lists
    let mut edges = Vec::new();
    let mut outgoing = vec![Vec::new(); blocks.len()];
    for block in &blocks {
        let from = block.id;
        let mut push = |to: BlockId, kind: EdgeKind| {
            if to != BlockId::EXIT {
                outgoing[from.index()].push(edges.len());
                edges.push(CfgEdge { from, to, kind });
            }
        };
        match &block.terminator {
            CfgTerminator::Fallthrough(to) => push(*to, EdgeKind::FallThrough),
            CfgTerminator::Jump(to) => push(*to, EdgeKind::BranchTaken),
            CfgTerminator::Branch {
                taken, not_taken, ..
            } => {
                push(*taken, EdgeKind::BranchTaken);
                push(*not_taken, EdgeKind::BranchNotTaken);
            }
            CfgTerminator::Switch { targets, default } => {
                for (case, to) in targets.iter().enumerate() {
                    push(*to, EdgeKind::Case(case));
                }
                push(*default, EdgeKind::BranchNotTaken);
            }
            CfgTerminator::Return | CfgTerminator::Raise | CfgTerminator::FallOff => {}
        }
        if let Some(handler) = &block.handler {
            push(lookup(handler.target), EdgeKind::Exception);
        }
    }
    for edge in &edges {
        let preds = &mut blocks[edge.to.index()].predecessors;
        if !preds.contains(&edge.from) {
            preds.push(edge.from);
        }
    }

    Ok(ControlFlowGraph {
        blocks,
        entry: BlockId(0),
        edges,
        outgoing,
        block_of,
    })
}

/// Collect all instruction indices that start a new basic block
fn collect_block_starts(unit: &BytecodeUnit) -> BTreeSet<usize> {
    let mut starts = BTreeSet::new();
    starts.insert(0);

    for (index, instr) in unit.instructions().iter().enumerate() {
        if let Some(target) = instr.jump_target() {
            starts.insert(target);
        }
        if instr.opcode == Opcode::Switch {
            if let Some(table) = unit.jump_table(instr.arg as usize) {
                starts.extend(table.iter().copied());
            }
        }
        // After any block-ending instruction the next one starts a block,
        // including dead code following a terminator.
        if instr.opcode.ends_block() {
            starts.insert(index + 1);
        }
    }

    for handler in unit.handlers() {
        starts.insert(handler.start);
        starts.insert(handler.end);
        starts.insert(handler.target);
    }

    starts
}

impl ControlFlowGraph {
    /// Get a block by ID
    pub fn block(&self, id: BlockId) -> &CfgBlock {
        &self.blocks[id.index()]
    }

    /// Block containing instruction `index`
    pub fn block_of(&self, index: usize) -> Option<BlockId> {
        self.block_of.get(index).copied()
    }

    /// Outgoing edges of a block, normal edges first
    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = &CfgEdge> + '_ {
        self.outgoing[id.index()].iter().map(move |&e| &self.edges[e])
    }

    /// All edges
    pub fn edges(&self) -> &[CfgEdge] {
        &self.edges
    }

    /// Number of blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Blocks in reverse postorder from the entry; unreachable blocks last
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry, 0usize)];
        visited[self.entry.index()] = true;

        while let Some((block, next_edge)) = stack.pop() {
            let succs = &self.outgoing[block.index()];
            if next_edge < succs.len() {
                stack.push((block, next_edge + 1));
                let to = self.edges[succs[next_edge]].to;
                if !visited[to.index()] {
                    visited[to.index()] = true;
                    stack.push((to, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        postorder.reverse();
        postorder.extend(
            self.blocks
                .iter()
                .map(|b| b.id)
                .filter(|id| !visited[id.index()]),
        );
        postorder
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{} [{}..{})", block.id, block.start, block.end)?;
            if !block.predecessors.is_empty() {
                write!(f, " preds:")?;
                for pred in &block.predecessors {
                    write!(f, " {}", pred)?;
                }
            }
            writeln!(f)?;
            for edge in self.successors(block.id) {
                writeln!(f, "    -> {} ({:?})", edge.to, edge.kind)?;
            }
            if block.terminator.is_exit() {
                writeln!(f, "    exit ({:?})", block.terminator)?;
            }
        }
        Ok(())
    }
}

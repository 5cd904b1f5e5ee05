//! Graph construction and representation assignment
//!
//! Every reachable instruction starts from the most optimistic
//! representation its inferred operand kinds allow. Demotion rules then
//! run to a fixpoint; they only ever turn unboxed nodes into boxed ones, so
//! the loop terminates. Anything not covered by a rule stays boxed.

use super::{EdgeSlot, EscapeTransition, GraphEdge, GraphNode, InstructionGraph};
use crate::jit::analysis::{AbstractValue, ControlFlowGraph, FrameState, ProgramPointStates};
use kestrel_bytecode::{BinaryOperator, BytecodeUnit, Constant, Kind, Opcode};
use rustc_hash::FxHashMap;

/// Number of operand-stack values an instruction consumes
///
/// Stack shuffles pass values through untouched and consume nothing.
fn stack_inputs(opcode: Opcode, arg: u32) -> usize {
    let arg = arg as usize;
    if opcode.binary_operator().is_some() {
        return 2;
    }
    match opcode {
        Opcode::PopTop
        | Opcode::StoreFast
        | Opcode::StoreGlobal
        | Opcode::UnaryPositive
        | Opcode::UnaryNegative
        | Opcode::UnaryNot
        | Opcode::UnaryInvert
        | Opcode::PopJumpIfFalse
        | Opcode::PopJumpIfTrue
        | Opcode::JumpIfFalseOrPop
        | Opcode::JumpIfTrueOrPop
        | Opcode::GetIter
        | Opcode::ForIter
        | Opcode::Switch
        | Opcode::ReturnValue
        | Opcode::Reraise
        | Opcode::PrintExpr => 1,
        Opcode::CompareOp | Opcode::IsOp | Opcode::ContainsOp | Opcode::DeleteSubscr => 2,
        Opcode::StoreSubscr => 3,
        Opcode::BuildTuple | Opcode::BuildList | Opcode::RaiseVarargs => arg,
        Opcode::BuildMap => arg * 2,
        Opcode::CallFunction => arg + 1,
        _ => 0,
    }
}

/// Most optimistic native kind for an instruction, given its pre-state
fn candidate(unit: &BytecodeUnit, state: &FrameState, opcode: Opcode, arg: u32) -> Option<Kind> {
    let input = |position: usize| {
        state
            .peek(position)
            .and_then(|entry| entry.value.concrete_kind())
    };
    let unboxable = |kind: &Kind| kind.is_unboxable();

    match opcode {
        Opcode::LoadConst => unit
            .constant(arg as usize)
            .map(Constant::kind)
            .filter(unboxable),
        Opcode::LoadFast => {
            let local = state.locals.get(arg as usize)?;
            if local.info.maybe_undefined {
                return None;
            }
            local.info.value.concrete_kind().filter(unboxable)
        }
        Opcode::StoreFast | Opcode::PopTop => input(0).filter(unboxable),
        Opcode::UnaryPositive | Opcode::UnaryNegative => {
            input(0).filter(|kind| matches!(kind, Kind::Integer | Kind::Float))
        }
        Opcode::UnaryNot => input(0).filter(|kind| *kind == Kind::Boolean),
        Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
            input(0).filter(|kind| *kind == Kind::Boolean)
        }
        Opcode::CompareOp => {
            let (lhs, rhs) = (input(1)?, input(0)?);
            (lhs == rhs && matches!(lhs, Kind::Integer | Kind::Float)).then_some(Kind::Boolean)
        }
        op => {
            let operator = op.binary_operator()?;
            let (lhs, rhs) = (input(1)?, input(0)?);
            if lhs != rhs {
                return None;
            }
            match (operator, lhs) {
                (
                    BinaryOperator::Add | BinaryOperator::Subtract | BinaryOperator::Multiply,
                    Kind::Integer | Kind::Float,
                ) => Some(lhs),
                (BinaryOperator::TrueDivide, Kind::Float) => Some(Kind::Float),
                (
                    BinaryOperator::Lshift
                    | BinaryOperator::Rshift
                    | BinaryOperator::And
                    | BinaryOperator::Or
                    | BinaryOperator::Xor,
                    Kind::Integer,
                ) => Some(Kind::Integer),
                _ => None,
            }
        }
    }
}

/// Edge before its transition is known
struct PendingEdge {
    from: usize,
    to: usize,
    slot: EdgeSlot,
    value: AbstractValue,
}

/// Build the instruction graph from completed abstract states
///
/// With `track_escapes` off every node is boxed.
pub fn build_graph(
    unit: &BytecodeUnit,
    cfg: &ControlFlowGraph,
    states: &ProgramPointStates,
    track_escapes: bool,
) -> InstructionGraph {
    let instructions = unit.instructions();

    // Step 1: Edges from value provenance
    let mut pending = Vec::new();
    for (index, instr) in instructions.iter().enumerate() {
        let Some(state) = states.state(index) else {
            continue;
        };
        for position in 0..stack_inputs(instr.opcode, instr.arg) {
            let Some(entry) = state.peek(position) else {
                continue;
            };
            for &from in &entry.sources {
                pending.push(PendingEdge {
                    from,
                    to: index,
                    slot: EdgeSlot::Stack(position),
                    value: entry.value,
                });
            }
        }
        if instr.opcode == Opcode::LoadFast {
            let local = instr.arg as usize;
            if let Some(entry) = state.locals.get(local) {
                for &from in &entry.stores {
                    pending.push(PendingEdge {
                        from,
                        to: index,
                        slot: EdgeSlot::Local(local),
                        value: entry.info.value,
                    });
                }
            }
        }
    }

    // Step 2: Optimistic representations
    let mut repr: Vec<Option<Kind>> = instructions
        .iter()
        .enumerate()
        .map(|(index, instr)| {
            if !track_escapes {
                return None;
            }
            let state = states.state(index)?;
            candidate(unit, state, instr.opcode, instr.arg)
        })
        .collect();

    // Step 3: Demote until consistent
    if track_escapes {
        while demote(unit, states, &pending, &mut repr) {}
    }

    // Step 4: Classify
    let nodes = instructions
        .iter()
        .enumerate()
        .map(|(index, instr)| GraphNode {
            index,
            opcode: instr.opcode,
            arg: instr.arg,
            block: cfg.block_of(index).unwrap_or(cfg.entry),
            reachable: states.is_reachable(index),
            unboxed: repr[index],
            escapes: repr[index].is_none(),
        })
        .collect();

    let edges = pending
        .into_iter()
        .map(|edge| GraphEdge {
            transition: EscapeTransition::between(
                repr[edge.from].is_some(),
                repr[edge.to].is_some(),
            ),
            from: edge.from,
            to: edge.to,
            slot: edge.slot,
            value: edge.value,
        })
        .collect();

    let graph = InstructionGraph::from_parts(nodes, edges);
    tracing::trace!(
        unit = unit.name(),
        nodes = graph.len(),
        edges = graph.edges().len(),
        unboxed = graph.unboxed_count(),
        "instruction graph built"
    );
    graph
}

/// One round of demotions; returns whether anything changed
fn demote(
    unit: &BytecodeUnit,
    states: &ProgramPointStates,
    edges: &[PendingEdge],
    repr: &mut [Option<Kind>],
) -> bool {
    let mut changed = false;
    let mut demote_node = |repr: &mut [Option<Kind>], index: usize| {
        if repr[index].take().is_some() {
            changed = true;
        }
    };

    // An unboxed consumer needs exactly the producer's native kind
    for edge in edges {
        if let (Some(kind), Some(_)) = (repr[edge.from], repr[edge.to]) {
            if edge.value != AbstractValue::Known(kind) {
                demote_node(repr, edge.to);
            }
        }
    }

    // Producers merging into one stack slot share its representation
    let mut merges: FxHashMap<(usize, EdgeSlot), Vec<usize>> = FxHashMap::default();
    for edge in edges {
        if matches!(edge.slot, EdgeSlot::Stack(_)) {
            merges.entry((edge.to, edge.slot)).or_default().push(edge.from);
        }
    }
    let mut conflicting: Vec<usize> = merges
        .into_values()
        .filter(|producers| producers.iter().any(|&p| repr[p] != repr[producers[0]]))
        .flatten()
        .collect();
    conflicting.sort_unstable();
    for producer in conflicting {
        demote_node(repr, producer);
    }

    // A local variable has one representation across all its stores and loads
    for local in 0..unit.local_count() {
        let mut members = Vec::new();
        let mut deleted = false;
        let mut entry_reaches = false;
        for (index, instr) in unit.instructions().iter().enumerate() {
            if instr.arg as usize != local || !instr.opcode.uses_local() {
                continue;
            }
            let Some(state) = states.state(index) else {
                continue;
            };
            match instr.opcode {
                Opcode::DeleteFast => deleted = true,
                Opcode::LoadFast => {
                    entry_reaches |= state.locals[local].from_entry;
                    members.push(index);
                }
                _ => members.push(index),
            }
        }
        let Some(&first) = members.first() else {
            continue;
        };

        let kind = repr[first];
        let uniform = kind.is_some()
            && !deleted
            && members.iter().all(|&m| repr[m] == kind)
            && (!entry_reaches || kind.map(AbstractValue::Known) == Some(states.entry_kind(local)));
        if !uniform {
            for member in members {
                demote_node(repr, member);
            }
        }
    }

    changed
}

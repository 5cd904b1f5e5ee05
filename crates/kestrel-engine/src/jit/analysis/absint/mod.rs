//! Abstract interpretation: forward dataflow type inference over the CFG
//!
//! A worklist of blocks is driven to a fixpoint. Each block's incoming
//! state only ever grows (old state joined with every newly arriving one),
//! so the lattice height bounds the number of times a block is revisited.
//!
//! When type feedback is supplied, operands left at `Top` at profiled
//! sites are narrowed to the kind observed at runtime. Every narrowing is
//! reported as a [`Speculation`] that compiled code must guard.

mod state;
pub mod transfer;

pub use state::{FrameState, LocalEntry, StackEntry};

use self::transfer::{transfer, Effect};
use crate::jit::analysis::cfg::{BlockId, CfgBlock, ControlFlowGraph, EdgeKind};
use crate::jit::analysis::lattice::AbstractValue;
use crate::jit::profiling::ProfileSite;
use kestrel_bytecode::{BytecodeUnit, Kind, Opcode};
use std::collections::{BTreeMap, VecDeque};

/// Default cap on block visits before the solver gives up
pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;

/// Errors from abstract interpretation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    #[error("Unsupported opcode {opcode} at {index}")]
    UnsupportedOpcode { opcode: Opcode, index: usize },
    #[error("Fixpoint not reached after {iterations} block visits")]
    Divergent { iterations: usize },
    #[error("Stack underflow at {index}")]
    StackUnderflow { index: usize },
    #[error("Inconsistent stack depth at {index}")]
    StackMismatch { index: usize },
}

/// Source of runtime type observations
pub trait TypeFeedback {
    /// Join of every kind observed at `site`; `Bottom` when nothing was seen
    fn observed(&self, site: ProfileSite) -> AbstractValue;
}

/// An assumption the compiled code depends on: a profiled narrowing or a
/// declared parameter kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Speculation {
    pub site: ProfileSite,
    pub kind: Kind,
}

/// A queryable slot of a program point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Operand-stack slot counted from the top (0 = top of stack)
    Stack(usize),
    /// Local variable
    Local(usize),
}

/// Per-instruction abstract states of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPointStates {
    states: Vec<Option<FrameState>>,
    entry_kinds: Vec<AbstractValue>,
    speculations: Vec<Speculation>,
    return_kind: AbstractValue,
    iterations: usize,
}

impl ProgramPointStates {
    /// Abstract value of `slot` just before instruction `index`, and
    /// whether a local may be unassigned there
    ///
    /// Unreachable points and missing slots report `Bottom`.
    pub fn kind_at(&self, index: usize, slot: Slot) -> (AbstractValue, bool) {
        let Some(state) = self.state(index) else {
            return (AbstractValue::Bottom, false);
        };
        match slot {
            Slot::Stack(depth) => state
                .peek(depth)
                .map_or((AbstractValue::Bottom, false), |entry| (entry.value, false)),
            Slot::Local(local) => state
                .locals
                .get(local)
                .map_or((AbstractValue::Bottom, false), |entry| {
                    (entry.info.value, entry.info.maybe_undefined)
                }),
        }
    }

    pub fn stack_at(&self, index: usize, depth: usize) -> AbstractValue {
        self.kind_at(index, Slot::Stack(depth)).0
    }

    pub fn local_at(&self, index: usize, local: usize) -> (AbstractValue, bool) {
        self.kind_at(index, Slot::Local(local))
    }

    /// Stack depth before `index`, `None` if unreachable
    pub fn stack_depth(&self, index: usize) -> Option<usize> {
        self.state(index).map(FrameState::depth)
    }

    pub fn state(&self, index: usize) -> Option<&FrameState> {
        self.states.get(index).and_then(Option::as_ref)
    }

    pub fn is_reachable(&self, index: usize) -> bool {
        self.state(index).is_some()
    }

    /// Number of program points (instructions)
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Kind of each local on entry to the unit
    pub fn entry_kind(&self, local: usize) -> AbstractValue {
        self.entry_kinds
            .get(local)
            .copied()
            .unwrap_or(AbstractValue::Bottom)
    }

    /// Profile-based narrowings, ordered by site
    pub fn speculations(&self) -> &[Speculation] {
        &self.speculations
    }

    /// Join of every value the unit may return
    pub fn return_kind(&self) -> AbstractValue {
        self.return_kind
    }

    /// Block visits needed to reach the fixpoint
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Run type inference with the default iteration cap
pub fn infer(
    unit: &BytecodeUnit,
    cfg: &ControlFlowGraph,
    initial_local_kinds: &[Option<Kind>],
    profile: Option<&dyn TypeFeedback>,
) -> Result<ProgramPointStates, AnalysisError> {
    let mut interpreter = AbstractInterpreter::new(unit, cfg);
    if let Some(feedback) = profile {
        interpreter = interpreter.with_feedback(feedback);
    }
    interpreter.run(initial_local_kinds)
}

/// Worklist fixpoint solver
pub struct AbstractInterpreter<'a> {
    unit: &'a BytecodeUnit,
    cfg: &'a ControlFlowGraph,
    feedback: Option<&'a dyn TypeFeedback>,
    max_iterations: usize,
}

impl<'a> AbstractInterpreter<'a> {
    pub fn new(unit: &'a BytecodeUnit, cfg: &'a ControlFlowGraph) -> Self {
        AbstractInterpreter {
            unit,
            cfg,
            feedback: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Narrow unknown operands using runtime observations
    pub fn with_feedback(mut self, feedback: &'a dyn TypeFeedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Solve to a fixpoint
    ///
    /// `initial_local_kinds[i]` is the caller-supplied kind of argument `i`;
    /// when absent, the declared parameter kind is used, then `Top`.
    pub fn run(
        &self,
        initial_local_kinds: &[Option<Kind>],
    ) -> Result<ProgramPointStates, AnalysisError> {
        let mut run = Run {
            unit: self.unit,
            feedback: self.feedback,
            pre_states: vec![None; self.unit.len()],
            speculations: BTreeMap::new(),
            return_kind: AbstractValue::Bottom,
        };

        let entry = run.entry_state(initial_local_kinds);
        let entry_kinds: Vec<AbstractValue> =
            entry.locals.iter().map(|local| local.info.value).collect();

        let block_count = self.cfg.block_count();
        let mut in_states: Vec<Option<FrameState>> = vec![None; block_count];
        let mut queued = vec![false; block_count];
        let mut worklist = VecDeque::new();

        in_states[self.cfg.entry.index()] = Some(entry);
        worklist.push_back(self.cfg.entry);
        queued[self.cfg.entry.index()] = true;

        let mut iterations = 0;
        while let Some(id) = worklist.pop_front() {
            queued[id.index()] = false;
            iterations += 1;
            if iterations > self.max_iterations {
                tracing::warn!(unit = self.unit.name(), iterations, "abstract interpretation diverged");
                return Err(AnalysisError::Divergent { iterations });
            }

            let block = self.cfg.block(id);
            let Some(state) = in_states[id.index()].clone() else {
                continue;
            };

            for (to, outgoing) in run.visit_block(self.cfg, block, state)? {
                let target = self.cfg.block(to);
                let changed = if let Some(existing) = in_states[to.index()].as_mut() {
                    existing.join_from(&outgoing, target.start)?
                } else {
                    in_states[to.index()] = Some(outgoing);
                    true
                };
                if changed && !queued[to.index()] {
                    queued[to.index()] = true;
                    worklist.push_back(to);
                }
            }
        }

        tracing::trace!(
            unit = self.unit.name(),
            iterations,
            blocks = block_count,
            speculations = run.speculations.len(),
            "fixpoint reached"
        );

        Ok(ProgramPointStates {
            states: run.pre_states,
            entry_kinds,
            speculations: run
                .speculations
                .into_iter()
                .map(|(site, kind)| Speculation { site, kind })
                .collect(),
            return_kind: run.return_kind,
            iterations,
        })
    }
}

/// Mutable state of one solver run
struct Run<'a> {
    unit: &'a BytecodeUnit,
    feedback: Option<&'a dyn TypeFeedback>,
    pre_states: Vec<Option<FrameState>>,
    speculations: BTreeMap<ProfileSite, Kind>,
    return_kind: AbstractValue,
}

impl Run<'_> {
    fn entry_state(&mut self, initial_local_kinds: &[Option<Kind>]) -> FrameState {
        let mut state = FrameState::new(self.unit.local_count());
        for arg in 0..self.unit.arg_count() {
            let supplied = initial_local_kinds.get(arg).copied().flatten();
            let value = match (supplied, self.unit.param_kind(arg)) {
                (Some(kind), _) => AbstractValue::Known(kind),
                // Declared kinds are assumptions too; dispatch must guard them.
                (None, Some(kind)) => {
                    self.speculations.insert(ProfileSite::argument(arg), kind);
                    AbstractValue::Known(kind)
                }
                (None, None) => self.narrow(ProfileSite::argument(arg), AbstractValue::Top),
            };
            state.locals[arg] = LocalEntry::argument(value);
        }
        state
    }

    /// Narrow a `Top` value at `site` to the observed kind, if monomorphic
    fn narrow(&mut self, site: ProfileSite, value: AbstractValue) -> AbstractValue {
        if !value.is_top() {
            return value;
        }
        let Some(feedback) = self.feedback else {
            return value;
        };
        match feedback.observed(site) {
            AbstractValue::Known(kind) => {
                self.speculations.insert(site, kind);
                AbstractValue::Known(kind)
            }
            _ => value,
        }
    }

    /// Interpret one block, returning the state sent along each outgoing edge
    fn visit_block(
        &mut self,
        cfg: &ControlFlowGraph,
        block: &CfgBlock,
        mut state: FrameState,
    ) -> Result<Vec<(BlockId, FrameState)>, AnalysisError> {
        let mut exception_state: Option<FrameState> = None;
        let mut pre_state = state.clone();

        for index in block.range() {
            let instr = self.unit.instructions()[index];

            for position in 0..instr.opcode.profiled_operands() {
                let site = ProfileSite::stack(index, position);
                if let Some(current) = state.peek(position).map(|entry| entry.value) {
                    let narrowed = self.narrow(site, current);
                    if let Some(entry) = state.peek_mut(position) {
                        entry.value = narrowed;
                    }
                }
            }

            pre_state = state.clone();
            if block.handler.is_some() {
                match &mut exception_state {
                    Some(joined) => {
                        joined.join_from(&pre_state, index)?;
                    }
                    None => exception_state = Some(pre_state.clone()),
                }
            }
            self.pre_states[index] = Some(pre_state.clone());

            match transfer(self.unit, index, &instr, &mut state)? {
                Effect::Continue => {}
                Effect::Return(value) => self.return_kind = self.return_kind.join(value),
                Effect::Raise => {}
            }
        }

        // Running off the end of the unit returns None
        let last = block.end.checked_sub(1).map(|i| self.unit.instructions()[i].opcode);
        if block.end == self.unit.len() && !last.is_some_and(Opcode::is_terminator) {
            self.return_kind = self.return_kind.join(AbstractValue::Known(Kind::None));
        }

        let mut outgoing = Vec::new();
        for edge in cfg.successors(block.id) {
            let edge_state = match edge.kind {
                EdgeKind::Exception => {
                    let Some(handler) = block.handler else {
                        continue;
                    };
                    let Some(mut joined) = exception_state.clone() else {
                        continue;
                    };
                    if joined.depth() < handler.depth {
                        return Err(AnalysisError::StackMismatch {
                            index: handler.target,
                        });
                    }
                    joined.stack.truncate(handler.depth);
                    joined.push(StackEntry::external(AbstractValue::Known(Kind::Object)));
                    joined
                }
                EdgeKind::BranchTaken => match last {
                    Some(Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop) => pre_state.clone(),
                    Some(Opcode::ForIter) => {
                        let mut exhausted = pre_state.clone();
                        exhausted.pop(block.end - 1)?;
                        exhausted
                    }
                    _ => state.clone(),
                },
                EdgeKind::FallThrough | EdgeKind::BranchNotTaken | EdgeKind::Case(_) => {
                    state.clone()
                }
            };
            outgoing.push((edge.to, edge_state));
        }
        Ok(outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::analysis::cfg::build_cfg;
    use kestrel_bytecode::{BinaryOperator, CompareOperator, Constant, UnitBuilder};
    use rustc_hash::FxHashMap;
    use std::collections::BTreeSet;

    use AbstractValue::{Known, Top};

    fn analyze(unit: &BytecodeUnit, kinds: &[Option<Kind>]) -> ProgramPointStates {
        let cfg = build_cfg(unit).unwrap();
        infer(unit, &cfg, kinds, None).unwrap()
    }

    fn cfg_blocks(unit: &BytecodeUnit) -> usize {
        build_cfg(unit).unwrap().block_count()
    }

    struct FixedFeedback(FxHashMap<ProfileSite, Kind>);

    impl TypeFeedback for FixedFeedback {
        fn observed(&self, site: ProfileSite) -> AbstractValue {
            self.0
                .get(&site)
                .map_or(AbstractValue::Bottom, |&kind| Known(kind))
        }
    }

    // ============================================================================
    // Straight-line code
    // ============================================================================

    #[test]
    fn test_add_two_integer_arguments() {
        let mut b = UnitBuilder::new("add").args(2);
        b.load_fast(0);
        b.load_fast(1);
        b.binary(BinaryOperator::Add);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[Some(Kind::Integer), Some(Kind::Integer)]);
        assert_eq!(states.stack_at(2, 0), Known(Kind::Integer));
        assert_eq!(states.stack_at(2, 1), Known(Kind::Integer));
        assert_eq!(states.stack_at(3, 0), Known(Kind::Integer));
        assert_eq!(states.return_kind(), Known(Kind::Integer));
        assert!(states.speculations().is_empty());
    }

    #[test]
    fn test_unknown_arguments_are_top() {
        let mut b = UnitBuilder::new("add").args(2);
        b.load_fast(0);
        b.load_fast(1);
        b.binary(BinaryOperator::Add);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert_eq!(states.local_at(0, 0), (Top, false));
        assert_eq!(states.stack_at(3, 0), Top);
    }

    #[test]
    fn test_declared_parameter_kind() {
        let mut b = UnitBuilder::new("neg").args(1).param_kind(0, Kind::Float);
        b.load_fast(0);
        b.emit(Opcode::UnaryNegative, 0);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert_eq!(states.return_kind(), Known(Kind::Float));
        assert_eq!(states.entry_kind(0), Known(Kind::Float));
        assert_eq!(
            states.speculations(),
            &[Speculation { site: ProfileSite::argument(0), kind: Kind::Float }]
        );
    }

    #[test]
    fn test_provenance_tracks_producers() {
        let mut b = UnitBuilder::new("dup");
        b.load_int(1);
        b.emit(Opcode::DupTop, 0);
        b.binary(BinaryOperator::Multiply);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        let before_mul = states.state(2).unwrap();
        assert_eq!(before_mul.stack[0].sources, BTreeSet::from([0]));
        assert_eq!(before_mul.stack[1].sources, BTreeSet::from([0]));
        assert_eq!(states.state(3).unwrap().stack[0].sources, BTreeSet::from([2]));
    }

    // ============================================================================
    // Branches and loops
    // ============================================================================

    #[test]
    fn test_local_assigned_on_one_path_is_maybe_undefined() {
        // def f(c): if c: x = 1; return x
        let mut b = UnitBuilder::new("f").args(1);
        let merge = b.new_label();
        b.load_fast(0);
        b.jump(Opcode::PopJumpIfFalse, merge);
        b.load_int(1);
        b.store_fast(1);
        b.bind(merge).unwrap();
        b.load_fast(1);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert_eq!(states.local_at(4, 1), (Known(Kind::Integer), true));
        assert!(states.local_at(2, 1).1);
        assert_eq!(states.local_at(3, 1), (AbstractValue::Undefined, true));
    }

    #[test]
    fn test_loop_reaches_fixpoint() {
        // i = 0; while i < 10: i = i + 1.5
        let mut b = UnitBuilder::new("loop");
        let head = b.new_label();
        let exit = b.new_label();
        b.load_int(0);
        b.store_fast(0);
        b.bind(head).unwrap();
        b.load_fast(0);
        b.load_int(10);
        b.compare(CompareOperator::Lt);
        b.jump(Opcode::PopJumpIfFalse, exit);
        b.load_fast(0);
        b.load_const(Constant::Float(1.5));
        b.binary(BinaryOperator::Add);
        b.store_fast(0);
        b.jump(Opcode::JumpAbsolute, head);
        b.bind(exit).unwrap();
        b.load_fast(0);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        // Integer on entry, Float from the back edge
        assert_eq!(states.local_at(2, 0), (Top, false));
        assert_eq!(states.local_at(6, 0), (Top, false));
        assert_eq!(states.stack_at(5, 0), Top);
        assert_eq!(states.stack_at(8, 1), Top);
        assert_eq!(states.stack_at(8, 0), Known(Kind::Float));
        assert!(states.iterations() > cfg_blocks(&unit));
    }

    #[test]
    fn test_deterministic_results() {
        let mut b = UnitBuilder::new("loop").args(1);
        let head = b.new_label();
        let exit = b.new_label();
        b.load_fast(0);
        b.emit(Opcode::GetIter, 0);
        b.bind(head).unwrap();
        b.jump(Opcode::ForIter, exit);
        b.store_fast(1);
        b.jump(Opcode::JumpAbsolute, head);
        b.bind(exit).unwrap();
        b.load_fast(1);
        b.return_value();
        let unit = b.build().unwrap();

        let first = analyze(&unit, &[]);
        let second = analyze(&unit, &[]);
        assert_eq!(first, second);
        // Exhausted edge pops the iterator
        assert_eq!(first.stack_depth(5), Some(0));
        assert_eq!(first.stack_depth(3), Some(2));
        assert_eq!(first.local_at(5, 1), (Top, true));
    }

    #[test]
    fn test_jump_if_or_pop_keeps_operand_on_taken_edge() {
        // return a or 2.0
        let mut b = UnitBuilder::new("or").args(1).param_kind(0, Kind::Float);
        let done = b.new_label();
        b.load_fast(0);
        b.jump(Opcode::JumpIfTrueOrPop, done);
        b.load_const(Constant::Float(2.0));
        b.bind(done).unwrap();
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert_eq!(states.stack_depth(2), Some(0));
        assert_eq!(states.stack_depth(3), Some(1));
        assert_eq!(states.stack_at(3, 0), Known(Kind::Float));
        let sources = &states.state(3).unwrap().stack[0].sources;
        assert_eq!(*sources, BTreeSet::from([0, 2]));
    }

    #[test]
    fn test_unreachable_code_is_bottom() {
        let mut b = UnitBuilder::new("dead");
        b.load_none();
        b.return_value();
        b.load_int(1);
        b.return_value();
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert!(!states.is_reachable(2));
        assert_eq!(states.kind_at(2, Slot::Stack(0)), (AbstractValue::Bottom, false));
        assert_eq!(states.return_kind(), Known(Kind::None));
    }

    #[test]
    fn test_fall_off_returns_none() {
        let mut b = UnitBuilder::new("falloff").args(1);
        let skip = b.new_label();
        b.load_fast(0);
        b.jump(Opcode::PopJumpIfFalse, skip);
        b.load_int(3);
        b.return_value();
        b.bind(skip).unwrap();
        b.emit(Opcode::Nop, 0);
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert_eq!(states.return_kind(), Top);
    }

    // ============================================================================
    // Exception edges
    // ============================================================================

    #[test]
    fn test_handler_entry_state() {
        // try: x = 1; g() ; except: return x
        let mut b = UnitBuilder::new("try");
        let start = b.new_label();
        let end = b.new_label();
        let handler = b.new_label();
        b.bind(start).unwrap();
        b.load_int(1);
        b.store_fast(0);
        b.load_global("g");
        b.call(0);
        b.emit(Opcode::PopTop, 0);
        b.bind(end).unwrap();
        b.load_none();
        b.return_value();
        b.bind(handler).unwrap();
        b.emit(Opcode::PopTop, 0);
        b.load_fast(0);
        b.return_value();
        b.handler(start, end, handler, 0);
        let unit = b.build().unwrap();

        let states = analyze(&unit, &[]);
        assert_eq!(states.stack_depth(7), Some(1));
        assert_eq!(states.stack_at(7, 0), Known(Kind::Object));
        // Raised before or after the store
        assert_eq!(states.local_at(7, 0), (Known(Kind::Integer), true));
    }

    #[test]
    fn test_handler_depth_beyond_stack() {
        let text = r#"{
            "name": "bad",
            "code": [{"op": "NOP"}, {"op": "LOAD_CONST"}, {"op": "RETURN_VALUE"}],
            "constants": [1],
            "handlers": [{"start": 0, "end": 1, "target": 1, "depth": 3}]
        }"#;
        let unit = BytecodeUnit::from_json(text).unwrap();
        let cfg = build_cfg(&unit).unwrap();
        assert_eq!(
            infer(&unit, &cfg, &[], None),
            Err(AnalysisError::StackMismatch { index: 1 })
        );
    }

    // ============================================================================
    // Errors
    // ============================================================================

    #[test]
    fn test_unsupported_opcode() {
        let mut b = UnitBuilder::new("annotations");
        b.emit(Opcode::SetupAnnotations, 0);
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();
        assert_eq!(
            infer(&unit, &cfg, &[], None),
            Err(AnalysisError::UnsupportedOpcode {
                opcode: Opcode::SetupAnnotations,
                index: 0
            })
        );
    }

    #[test]
    fn test_stack_underflow() {
        let mut b = UnitBuilder::new("underflow");
        b.emit(Opcode::PopTop, 0);
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();
        assert_eq!(
            infer(&unit, &cfg, &[], None),
            Err(AnalysisError::StackUnderflow { index: 0 })
        );
    }

    #[test]
    fn test_stack_mismatch_at_merge() {
        let mut b = UnitBuilder::new("mismatch").args(1);
        let merge = b.new_label();
        b.load_fast(0);
        b.jump(Opcode::PopJumpIfFalse, merge);
        b.load_int(1);
        b.bind(merge).unwrap();
        b.load_none();
        b.return_value();
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();
        assert_eq!(
            infer(&unit, &cfg, &[], None),
            Err(AnalysisError::StackMismatch { index: 3 })
        );
    }

    #[test]
    fn test_iteration_cap() {
        let mut b = UnitBuilder::new("loop");
        let head = b.new_label();
        b.load_int(0);
        b.store_fast(0);
        b.bind(head).unwrap();
        b.load_fast(0);
        b.load_const(Constant::Float(1.0));
        b.binary(BinaryOperator::Add);
        b.store_fast(0);
        b.jump(Opcode::JumpAbsolute, head);
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();

        let result = AbstractInterpreter::new(&unit, &cfg).max_iterations(1).run(&[]);
        assert_eq!(result, Err(AnalysisError::Divergent { iterations: 2 }));
    }

    // ============================================================================
    // Profile narrowing
    // ============================================================================

    #[test]
    fn test_narrowing_records_speculations() {
        let mut b = UnitBuilder::new("add").args(2);
        b.load_fast(0);
        b.load_fast(1);
        b.binary(BinaryOperator::Add);
        b.return_value();
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();

        let mut observed = FxHashMap::default();
        observed.insert(ProfileSite::stack(2, 0), Kind::Integer);
        observed.insert(ProfileSite::stack(2, 1), Kind::Integer);
        let feedback = FixedFeedback(observed);

        let states = infer(&unit, &cfg, &[], Some(&feedback)).unwrap();
        assert_eq!(states.stack_at(2, 0), Known(Kind::Integer));
        assert_eq!(states.stack_at(3, 0), Known(Kind::Integer));
        assert_eq!(states.speculations().len(), 2);
        assert_eq!(
            states.speculations()[0],
            Speculation {
                site: ProfileSite::stack(2, 0),
                kind: Kind::Integer
            }
        );
    }

    #[test]
    fn test_argument_narrowing() {
        let mut b = UnitBuilder::new("id").args(1);
        b.load_fast(0);
        b.return_value();
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();

        let mut observed = FxHashMap::default();
        observed.insert(ProfileSite::argument(0), Kind::Float);
        let feedback = FixedFeedback(observed);

        let states = infer(&unit, &cfg, &[], Some(&feedback)).unwrap();
        assert_eq!(states.entry_kind(0), Known(Kind::Float));
        assert_eq!(states.return_kind(), Known(Kind::Float));

        // A caller-supplied kind wins over the profile
        let states = infer(&unit, &cfg, &[Some(Kind::String)], Some(&feedback)).unwrap();
        assert_eq!(states.return_kind(), Known(Kind::String));
        assert!(states.speculations().is_empty());
    }

    #[test]
    fn test_narrowing_leaves_known_values_alone() {
        let mut b = UnitBuilder::new("neg");
        b.load_const(Constant::Float(2.0));
        b.emit(Opcode::UnaryNegative, 0);
        b.return_value();
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();

        let mut observed = FxHashMap::default();
        observed.insert(ProfileSite::stack(1, 0), Kind::Integer);
        let feedback = FixedFeedback(observed);

        let states = infer(&unit, &cfg, &[], Some(&feedback)).unwrap();
        assert_eq!(states.stack_at(1, 0), Known(Kind::Float));
        assert!(states.speculations().is_empty());
    }

    #[test]
    fn test_keep_or_pop_operand_is_narrowed() {
        // return a or 2
        let mut b = UnitBuilder::new("or").args(1);
        let done = b.new_label();
        b.load_fast(0);
        b.jump(Opcode::JumpIfTrueOrPop, done);
        b.load_int(2);
        b.bind(done).unwrap();
        b.return_value();
        let unit = b.build().unwrap();
        let cfg = build_cfg(&unit).unwrap();

        let mut observed = FxHashMap::default();
        observed.insert(ProfileSite::stack(1, 0), Kind::Integer);
        let feedback = FixedFeedback(observed);

        let states = infer(&unit, &cfg, &[], Some(&feedback)).unwrap();
        assert_eq!(states.stack_at(3, 0), Known(Kind::Integer));
        assert_eq!(states.return_kind(), Known(Kind::Integer));
        assert_eq!(
            states.speculations(),
            &[Speculation { site: ProfileSite::stack(1, 0), kind: Kind::Integer }]
        );
    }
}

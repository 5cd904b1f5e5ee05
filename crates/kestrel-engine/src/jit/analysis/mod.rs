//! Bytecode analysis: control flow, the value lattice and type inference

pub mod absint;
pub mod cfg;
pub mod lattice;

pub use absint::{
    infer, AbstractInterpreter, AnalysisError, FrameState, LocalEntry, ProgramPointStates, Slot,
    Speculation, StackEntry, TypeFeedback,
};
pub use cfg::{build_cfg, BlockId, CfgBlock, CfgEdge, CfgError, CfgTerminator, ControlFlowGraph, EdgeKind};
pub use lattice::{AbstractValue, LocalInfo};

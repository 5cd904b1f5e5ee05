//! Kestrel Bytecode Definitions
//!
//! This crate provides the instruction set, the immutable bytecode unit
//! format, a label-resolving builder and structural verification for the
//! Kestrel VM.

#![warn(rust_2018_idioms)]

pub mod builder;
pub mod encoder;
pub mod kind;
pub mod opcode;
pub mod unit;
pub mod verify;

pub use builder::{BuildError, Label, UnitBuilder};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use kind::Kind;
pub use opcode::{BinaryOperator, CompareOperator, Opcode};
pub use unit::{
    BytecodeUnit, Constant, ExceptionHandler, Instruction, RawInstruction, UnitDef, UnitError,
    UnitId, INSTRUCTION_SIZE,
};
pub use verify::{verify_unit, VerifyError};

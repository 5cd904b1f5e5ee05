//! Bytecode unit format
//!
//! A [`BytecodeUnit`] is one function body: instructions plus the tables they
//! index into. Units are immutable once constructed; the runtime shares them
//! behind `Arc` and keys every per-unit structure by [`UnitId`].

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::kind::Kind;
use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Magic number for Kestrel unit files: "KSTL"
pub const MAGIC: [u8; 4] = *b"KSTL";

/// Current unit format version
pub const VERSION: u32 = 1;

/// Size in bytes of one instruction in the wordcode layout
pub const INSTRUCTION_SIZE: usize = 2;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a bytecode unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocate a fresh id
    pub fn fresh() -> Self {
        UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unit file encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected KSTL, got {0:?}")]
    InvalidMagic(Vec<u8>),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Constant pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Constant {
    /// Runtime kind of the constant
    pub fn kind(&self) -> Kind {
        match self {
            Constant::None => Kind::None,
            Constant::Bool(_) => Kind::Boolean,
            Constant::Int(_) => Kind::Integer,
            Constant::Float(_) => Kind::Float,
            Constant::Str(_) => Kind::String,
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        match self {
            Constant::None => writer.emit_u8(0),
            Constant::Bool(value) => {
                writer.emit_u8(1);
                writer.emit_u8(*value as u8);
            }
            Constant::Int(value) => {
                writer.emit_u8(2);
                writer.emit_i64(*value);
            }
            Constant::Float(value) => {
                writer.emit_u8(3);
                writer.emit_f64(*value);
            }
            Constant::Str(value) => {
                writer.emit_u8(4);
                writer.emit_string(value);
            }
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            0 => Ok(Constant::None),
            1 => Ok(Constant::Bool(reader.read_u8()? != 0)),
            2 => Ok(Constant::Int(reader.read_i64()?)),
            3 => Ok(Constant::Float(reader.read_f64()?)),
            4 => Ok(Constant::Str(reader.read_string()?)),
            tag => Err(DecodeError::InvalidTag {
                what: "constant",
                tag,
                offset,
            }),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => f.write_str("None"),
            Constant::Bool(true) => f.write_str("True"),
            Constant::Bool(false) => f.write_str("False"),
            Constant::Int(value) => write!(f, "{}", value),
            Constant::Float(value) => write!(f, "{:?}", value),
            Constant::Str(value) => write!(f, "{:?}", value),
        }
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Operation
    pub opcode: Opcode,
    /// Argument (0 when the opcode takes none)
    pub arg: u32,
    /// Byte offset in the wordcode layout
    pub offset: usize,
}

impl Instruction {
    /// Instruction index this instruction jumps to, if it is a jump
    pub fn jump_target(&self) -> Option<usize> {
        self.opcode.is_jump().then_some(self.arg as usize)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5} {:<22} {}", self.offset, self.opcode.name(), self.arg)
    }
}

/// Protected region with its handler
///
/// An exception raised by an instruction in `start..end` truncates the
/// operand stack to `depth`, pushes the exception and continues at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    pub depth: usize,
}

impl ExceptionHandler {
    /// Whether `index` lies inside the protected range
    pub fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Instruction as written in unit descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub op: Opcode,
    #[serde(default)]
    pub arg: u32,
}

/// Serializable description of a unit
///
/// This is the JSON surface and the input to [`BytecodeUnit::new`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
    pub name: String,
    #[serde(default)]
    pub arg_count: usize,
    #[serde(default)]
    pub local_count: usize,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub names: Vec<String>,
    pub code: Vec<RawInstruction>,
    #[serde(default)]
    pub handlers: Vec<ExceptionHandler>,
    #[serde(default)]
    pub jump_tables: Vec<Vec<usize>>,
    #[serde(default)]
    pub param_kinds: Vec<Option<Kind>>,
}

/// An immutable compiled function body
#[derive(Debug)]
pub struct BytecodeUnit {
    id: UnitId,
    name: String,
    arg_count: usize,
    local_count: usize,
    constants: Vec<Constant>,
    names: Vec<String>,
    instructions: Vec<Instruction>,
    handlers: Vec<ExceptionHandler>,
    jump_tables: Vec<Vec<usize>>,
    param_kinds: Vec<Option<Kind>>,
}

impl BytecodeUnit {
    /// Build a unit from its description, assigning a fresh id and offsets
    ///
    /// The unit is not verified; see [`crate::verify_unit`].
    pub fn new(def: UnitDef) -> Self {
        let instructions = def
            .code
            .iter()
            .enumerate()
            .map(|(index, raw)| Instruction {
                opcode: raw.op,
                arg: raw.arg,
                offset: index * INSTRUCTION_SIZE,
            })
            .collect();
        Self {
            id: UnitId::fresh(),
            name: def.name,
            arg_count: def.arg_count,
            local_count: def.local_count.max(def.arg_count),
            constants: def.constants,
            names: def.names,
            instructions,
            handlers: def.handlers,
            jump_tables: def.jump_tables,
            param_kinds: def.param_kinds,
        }
    }

    /// Description of this unit (round-trips through [`BytecodeUnit::new`])
    pub fn to_def(&self) -> UnitDef {
        UnitDef {
            name: self.name.clone(),
            arg_count: self.arg_count,
            local_count: self.local_count,
            constants: self.constants.clone(),
            names: self.names.clone(),
            code: self
                .instructions
                .iter()
                .map(|instr| RawInstruction {
                    op: instr.opcode,
                    arg: instr.arg,
                })
                .collect(),
            handlers: self.handlers.clone(),
            jump_tables: self.jump_tables.clone(),
            param_kinds: self.param_kinds.clone(),
        }
    }

    /// Parse a unit from its JSON description
    pub fn from_json(text: &str) -> Result<Self, UnitError> {
        let def: UnitDef = serde_json::from_str(text)?;
        Ok(Self::new(def))
    }

    /// Render the unit as pretty JSON
    pub fn to_json(&self) -> Result<String, UnitError> {
        Ok(serde_json::to_string_pretty(&self.to_def())?)
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn constant(&self, index: usize) -> Option<&Constant> {
        self.constants.get(index)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Size of the instruction stream in bytes
    pub fn code_size(&self) -> usize {
        self.instructions.len() * INSTRUCTION_SIZE
    }

    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    pub fn jump_tables(&self) -> &[Vec<usize>] {
        &self.jump_tables
    }

    pub fn jump_table(&self, index: usize) -> Option<&[usize]> {
        self.jump_tables.get(index).map(Vec::as_slice)
    }

    pub fn param_kinds(&self) -> &[Option<Kind>] {
        &self.param_kinds
    }

    /// Declared kind of argument `index`, if any
    pub fn param_kind(&self, index: usize) -> Option<Kind> {
        self.param_kinds.get(index).copied().flatten()
    }

    /// Innermost handler protecting instruction `index`
    ///
    /// The narrowest covering range wins; ties go to the first entry.
    pub fn handler_for(&self, index: usize) -> Option<&ExceptionHandler> {
        self.handlers
            .iter()
            .filter(|handler| handler.covers(index))
            .min_by_key(|handler| handler.end.saturating_sub(handler.start))
    }

    /// Human-readable listing
    pub fn disassemble(&self) -> String {
        let mut out = format!(
            "unit {} {} (args: {}, locals: {})\n",
            self.name, self.id, self.arg_count, self.local_count
        );
        for (index, instr) in self.instructions.iter().enumerate() {
            let detail = match instr.opcode {
                Opcode::LoadConst => self
                    .constant(instr.arg as usize)
                    .map(|c| format!(" ({})", c))
                    .unwrap_or_default(),
                op if op.uses_name() => self
                    .name_at(instr.arg as usize)
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default(),
                Opcode::CompareOp => crate::opcode::CompareOperator::from_arg(instr.arg)
                    .map(|c| format!(" ({})", c.symbol()))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            out.push_str(&format!("{:>4} {}{}\n", index, instr, detail));
        }
        for handler in &self.handlers {
            out.push_str(&format!(
                "handler {}..{} -> {} depth {}\n",
                handler.start, handler.end, handler.target, handler.depth
            ));
        }
        out
    }

    /// Encode the unit to its binary file format
    ///
    /// Format:
    /// - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
    /// - Name, argument and local counts
    /// - Constants, names, declared parameter kinds
    /// - Instructions (opcode byte + u32 argument each)
    /// - Handler table, jump tables
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::with_capacity(64 + self.instructions.len() * 5);

        writer.emit_bytes(&MAGIC);
        writer.emit_u32(VERSION);
        writer.emit_u32(0);
        let checksum_offset = writer.reserve_u32();

        writer.emit_string(&self.name);
        writer.emit_u32(self.arg_count as u32);
        writer.emit_u32(self.local_count as u32);

        writer.emit_u32(self.constants.len() as u32);
        for constant in &self.constants {
            constant.encode(&mut writer);
        }

        writer.emit_u32(self.names.len() as u32);
        for name in &self.names {
            writer.emit_string(name);
        }

        writer.emit_u32(self.param_kinds.len() as u32);
        for kind in &self.param_kinds {
            writer.emit_u8(kind.map(Kind::to_u8).unwrap_or(u8::MAX));
        }

        writer.emit_u32(self.instructions.len() as u32);
        for instr in &self.instructions {
            writer.emit_instruction(instr.opcode, instr.arg);
        }

        writer.emit_u32(self.handlers.len() as u32);
        for handler in &self.handlers {
            writer.emit_u32(handler.start as u32);
            writer.emit_u32(handler.end as u32);
            writer.emit_u32(handler.target as u32);
            writer.emit_u32(handler.depth as u32);
        }

        writer.emit_u32(self.jump_tables.len() as u32);
        for table in &self.jump_tables {
            writer.emit_u32(table.len() as u32);
            for &target in table {
                writer.emit_u32(target as u32);
            }
        }

        let checksum = crc32fast::hash(&writer.buffer()[16..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a unit from its binary file format, assigning a fresh id
    pub fn decode(data: &[u8]) -> Result<Self, UnitError> {
        let mut reader = BytecodeReader::new(data);

        let magic = reader.read_bytes(4)?;
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(UnitError::UnsupportedVersion(version));
        }
        let _flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let calculated_checksum = crc32fast::hash(&data[16..]);
        if stored_checksum != calculated_checksum {
            return Err(UnitError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let name = reader.read_string()?;
        let arg_count = reader.read_u32()? as usize;
        let local_count = reader.read_u32()? as usize;

        let count = reader.read_u32()? as usize;
        let mut constants = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            constants.push(Constant::decode(&mut reader)?);
        }

        let count = reader.read_u32()? as usize;
        let mut names = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            names.push(reader.read_string()?);
        }

        let count = reader.read_u32()? as usize;
        let mut param_kinds = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let offset = reader.position();
            let tag = reader.read_u8()?;
            let kind = if tag == u8::MAX {
                None
            } else {
                Some(Kind::from_u8(tag).ok_or(DecodeError::InvalidTag {
                    what: "kind",
                    tag,
                    offset,
                })?)
            };
            param_kinds.push(kind);
        }

        let count = reader.read_u32()? as usize;
        let mut code = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let (op, arg) = reader.read_instruction()?;
            code.push(RawInstruction { op, arg });
        }

        let count = reader.read_u32()? as usize;
        let mut handlers = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            handlers.push(ExceptionHandler {
                start: reader.read_u32()? as usize,
                end: reader.read_u32()? as usize,
                target: reader.read_u32()? as usize,
                depth: reader.read_u32()? as usize,
            });
        }

        let count = reader.read_u32()? as usize;
        let mut jump_tables = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let len = reader.read_u32()? as usize;
            let mut table = Vec::with_capacity(len.min(reader.remaining()));
            for _ in 0..len {
                table.push(reader.read_u32()? as usize);
            }
            jump_tables.push(table);
        }

        Ok(Self::new(UnitDef {
            name,
            arg_count,
            local_count,
            constants,
            names,
            code,
            handlers,
            jump_tables,
            param_kinds,
        }))
    }
}

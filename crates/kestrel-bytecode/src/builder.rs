//! Label-resolving unit builder
//!
//! Emits instructions with symbolic jump targets and patches them once every
//! label is bound, the same reserve-then-patch discipline the binary writer
//! uses for forward offsets.

use crate::kind::Kind;
use crate::opcode::{BinaryOperator, CompareOperator, Opcode};
use crate::unit::{BytecodeUnit, Constant, ExceptionHandler, RawInstruction, UnitDef};
use thiserror::Error;

/// Builder errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// A label was referenced but never bound
    #[error("Label {0} was never bound")]
    UnboundLabel(usize),

    /// A label was bound twice
    #[error("Label {0} bound twice")]
    Rebound(usize),
}

/// Symbolic jump target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

struct PendingHandler {
    start: Label,
    end: Label,
    target: Label,
    depth: usize,
}

/// Incremental builder for [`BytecodeUnit`]
pub struct UnitBuilder {
    name: String,
    arg_count: usize,
    local_count: usize,
    constants: Vec<Constant>,
    names: Vec<String>,
    code: Vec<RawInstruction>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
    handlers: Vec<PendingHandler>,
    jump_tables: Vec<Vec<Label>>,
    param_kinds: Vec<Option<Kind>>,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_count: 0,
            local_count: 0,
            constants: Vec::new(),
            names: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            jump_tables: Vec::new(),
            param_kinds: Vec::new(),
        }
    }

    /// Declare the argument count; arguments occupy the first locals
    pub fn args(mut self, count: usize) -> Self {
        self.arg_count = count;
        self.local_count = self.local_count.max(count);
        self
    }

    /// Reserve at least `count` locals
    pub fn locals(mut self, count: usize) -> Self {
        self.local_count = self.local_count.max(count);
        self
    }

    /// Declare the kind of argument `index`
    pub fn param_kind(mut self, index: usize, kind: Kind) -> Self {
        if self.param_kinds.len() <= index {
            self.param_kinds.resize(index + 1, None);
        }
        self.param_kinds[index] = Some(kind);
        self
    }

    /// Index the next emitted instruction will get
    pub fn current_index(&self) -> usize {
        self.code.len()
    }

    /// Emit a raw instruction and return its index
    pub fn emit(&mut self, op: Opcode, arg: u32) -> usize {
        let index = self.code.len();
        self.code.push(RawInstruction { op, arg });
        index
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next instruction index
    pub fn bind(&mut self, label: Label) -> Result<(), BuildError> {
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            return Err(BuildError::Rebound(label.0));
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    /// Emit a jump whose target is patched at build time
    pub fn jump(&mut self, op: Opcode, label: Label) -> usize {
        debug_assert!(op.is_jump(), "{} does not take a jump target", op);
        let index = self.emit(op, 0);
        self.fixups.push((index, label));
        index
    }

    /// Intern a constant and return its pool index
    pub fn constant(&mut self, value: Constant) -> u32 {
        if let Some(index) = self.constants.iter().position(|c| same_constant(c, &value)) {
            return index as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Intern a name and return its table index
    pub fn name(&mut self, name: &str) -> u32 {
        if let Some(index) = self.names.iter().position(|n| n == name) {
            return index as u32;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    // ===== Convenience emitters =====

    pub fn load_const(&mut self, value: Constant) -> usize {
        let index = self.constant(value);
        self.emit(Opcode::LoadConst, index)
    }

    pub fn load_int(&mut self, value: i64) -> usize {
        self.load_const(Constant::Int(value))
    }

    pub fn load_none(&mut self) -> usize {
        self.load_const(Constant::None)
    }

    pub fn load_fast(&mut self, local: usize) -> usize {
        self.local_count = self.local_count.max(local + 1);
        self.emit(Opcode::LoadFast, local as u32)
    }

    pub fn store_fast(&mut self, local: usize) -> usize {
        self.local_count = self.local_count.max(local + 1);
        self.emit(Opcode::StoreFast, local as u32)
    }

    pub fn load_global(&mut self, name: &str) -> usize {
        let index = self.name(name);
        self.emit(Opcode::LoadGlobal, index)
    }

    pub fn store_global(&mut self, name: &str) -> usize {
        let index = self.name(name);
        self.emit(Opcode::StoreGlobal, index)
    }

    pub fn import_name(&mut self, name: &str) -> usize {
        let index = self.name(name);
        self.emit(Opcode::ImportName, index)
    }

    pub fn binary(&mut self, op: BinaryOperator) -> usize {
        let opcode = match op {
            BinaryOperator::Add => Opcode::BinaryAdd,
            BinaryOperator::Subtract => Opcode::BinarySubtract,
            BinaryOperator::Multiply => Opcode::BinaryMultiply,
            BinaryOperator::TrueDivide => Opcode::BinaryTrueDivide,
            BinaryOperator::FloorDivide => Opcode::BinaryFloorDivide,
            BinaryOperator::Modulo => Opcode::BinaryModulo,
            BinaryOperator::Power => Opcode::BinaryPower,
            BinaryOperator::Lshift => Opcode::BinaryLshift,
            BinaryOperator::Rshift => Opcode::BinaryRshift,
            BinaryOperator::And => Opcode::BinaryAnd,
            BinaryOperator::Or => Opcode::BinaryOr,
            BinaryOperator::Xor => Opcode::BinaryXor,
            BinaryOperator::Subscr => Opcode::BinarySubscr,
        };
        self.emit(opcode, 0)
    }

    pub fn compare(&mut self, op: CompareOperator) -> usize {
        self.emit(Opcode::CompareOp, op as u32)
    }

    pub fn call(&mut self, argc: usize) -> usize {
        self.emit(Opcode::CallFunction, argc as u32)
    }

    pub fn return_value(&mut self) -> usize {
        self.emit(Opcode::ReturnValue, 0)
    }

    /// Emit a multi-way `Switch` over `targets`
    pub fn switch(&mut self, targets: Vec<Label>) -> usize {
        self.jump_tables.push(targets);
        let table = (self.jump_tables.len() - 1) as u32;
        self.emit(Opcode::Switch, table)
    }

    /// Protect `start..end` with a handler at `target`, unwinding to `depth`
    pub fn handler(&mut self, start: Label, end: Label, target: Label, depth: usize) {
        self.handlers.push(PendingHandler {
            start,
            end,
            target,
            depth,
        });
    }

    fn resolve(&self, label: Label) -> Result<usize, BuildError> {
        self.labels[label.0].ok_or(BuildError::UnboundLabel(label.0))
    }

    /// Patch every label reference and produce the unit description
    pub fn finish(mut self) -> Result<UnitDef, BuildError> {
        for &(index, label) in &self.fixups {
            let target = self.labels[label.0].ok_or(BuildError::UnboundLabel(label.0))?;
            self.code[index].arg = target as u32;
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            handlers.push(ExceptionHandler {
                start: self.resolve(pending.start)?,
                end: self.resolve(pending.end)?,
                target: self.resolve(pending.target)?,
                depth: pending.depth,
            });
        }

        let mut jump_tables = Vec::with_capacity(self.jump_tables.len());
        for table in &self.jump_tables {
            let resolved = table
                .iter()
                .map(|&label| self.resolve(label))
                .collect::<Result<Vec<_>, _>>()?;
            jump_tables.push(resolved);
        }

        Ok(UnitDef {
            name: self.name,
            arg_count: self.arg_count,
            local_count: self.local_count,
            constants: self.constants,
            names: self.names,
            code: self.code,
            handlers,
            jump_tables,
            param_kinds: self.param_kinds,
        })
    }

    /// Finish and construct the unit
    pub fn build(self) -> Result<BytecodeUnit, BuildError> {
        Ok(BytecodeUnit::new(self.finish()?))
    }
}

/// Constant identity for interning: floats compare by bit pattern so that
/// `0.0` and `-0.0` stay distinct.
fn same_constant(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Float(x), Constant::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

//! Bytecode opcodes for the Kestrel VM
//!
//! Every instruction is an opcode byte plus a 32-bit argument (`oparg`).
//! Instructions that take no argument carry `0`.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation
//! - 0x10-0x1F: Constants, locals and globals
//! - 0x20-0x2F: Unary operations
//! - 0x30-0x3F: Binary operations
//! - 0x40-0x4F: In-place binary operations
//! - 0x50-0x5F: Comparisons
//! - 0x60-0x6F: Containers
//! - 0x70-0x7F: Control flow
//! - 0x80-0x8F: Calls
//! - 0x90-0x9F: Frame exits
//! - 0xA0-0xAF: Host-delegated operations

use serde::{Deserialize, Serialize};

/// Bytecode opcode enumeration
///
/// Jump arguments are absolute instruction indices, not byte offsets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // ===== Stack Manipulation (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    PopTop = 0x01,
    /// Swap the top two stack values
    RotTwo = 0x02,
    /// Lift the second and third values up one, move top down to third
    RotThree = 0x03,
    /// Duplicate top stack value
    DupTop = 0x04,
    /// Duplicate the top two stack values, preserving order
    DupTopTwo = 0x05,

    // ===== Constants, Locals, Globals (0x10-0x1F) =====
    /// Push constant from the pool (oparg: constant index)
    LoadConst = 0x10,
    /// Push local variable (oparg: local index)
    LoadFast = 0x11,
    /// Pop into local variable (oparg: local index)
    StoreFast = 0x12,
    /// Unbind local variable (oparg: local index)
    DeleteFast = 0x13,
    /// Push global or builtin by name (oparg: name index)
    LoadGlobal = 0x14,
    /// Pop into global by name (oparg: name index)
    StoreGlobal = 0x15,

    // ===== Unary Operations (0x20-0x2F) =====
    /// pop a, push +a
    UnaryPositive = 0x20,
    /// pop a, push -a
    UnaryNegative = 0x21,
    /// pop a, push not a
    UnaryNot = 0x22,
    /// pop a, push ~a
    UnaryInvert = 0x23,

    // ===== Binary Operations (0x30-0x3F) =====
    /// pop b, pop a, push a + b
    BinaryAdd = 0x30,
    /// pop b, pop a, push a - b
    BinarySubtract = 0x31,
    /// pop b, pop a, push a * b
    BinaryMultiply = 0x32,
    /// pop b, pop a, push a / b
    BinaryTrueDivide = 0x33,
    /// pop b, pop a, push a // b
    BinaryFloorDivide = 0x34,
    /// pop b, pop a, push a % b
    BinaryModulo = 0x35,
    /// pop b, pop a, push a ** b
    BinaryPower = 0x36,
    /// pop b, pop a, push a << b
    BinaryLshift = 0x37,
    /// pop b, pop a, push a >> b
    BinaryRshift = 0x38,
    /// pop b, pop a, push a & b
    BinaryAnd = 0x39,
    /// pop b, pop a, push a | b
    BinaryOr = 0x3A,
    /// pop b, pop a, push a ^ b
    BinaryXor = 0x3B,
    /// pop index, pop container, push container[index]
    BinarySubscr = 0x3C,

    // ===== In-place Binary Operations (0x40-0x4F) =====
    /// a += b
    InplaceAdd = 0x40,
    /// a -= b
    InplaceSubtract = 0x41,
    /// a *= b
    InplaceMultiply = 0x42,
    /// a /= b
    InplaceTrueDivide = 0x43,
    /// a //= b
    InplaceFloorDivide = 0x44,
    /// a %= b
    InplaceModulo = 0x45,

    // ===== Comparisons (0x50-0x5F) =====
    /// pop b, pop a, push a <op> b (oparg: [`CompareOperator`])
    CompareOp = 0x50,
    /// pop b, pop a, push a is b (oparg 1 inverts)
    IsOp = 0x51,
    /// pop container, pop item, push item in container (oparg 1 inverts)
    ContainsOp = 0x52,

    // ===== Containers (0x60-0x6F) =====
    /// pop n values, push tuple (oparg: n)
    BuildTuple = 0x60,
    /// pop n values, push list (oparg: n)
    BuildList = 0x61,
    /// pop n key/value pairs, push dict (oparg: n)
    BuildMap = 0x62,
    /// pop index, pop container, pop value; container[index] = value
    StoreSubscr = 0x63,
    /// pop index, pop container; del container[index]
    DeleteSubscr = 0x64,

    // ===== Control Flow (0x70-0x7F) =====
    /// Unconditional forward jump (oparg: target index)
    JumpForward = 0x70,
    /// Unconditional jump (oparg: target index)
    JumpAbsolute = 0x71,
    /// pop a; jump if falsy (oparg: target index)
    PopJumpIfFalse = 0x72,
    /// pop a; jump if truthy (oparg: target index)
    PopJumpIfTrue = 0x73,
    /// jump keeping a if falsy, otherwise pop a (oparg: target index)
    JumpIfFalseOrPop = 0x74,
    /// jump keeping a if truthy, otherwise pop a (oparg: target index)
    JumpIfTrueOrPop = 0x75,
    /// pop a, push iter(a)
    GetIter = 0x76,
    /// push next(TOS), or pop the iterator and jump when exhausted (oparg: target index)
    ForIter = 0x77,
    /// pop integer i; jump to jump_tables[oparg][i], fall through when out of range
    Switch = 0x78,

    // ===== Calls (0x80-0x8F) =====
    /// pop argc arguments, pop callable, push result (oparg: argc)
    CallFunction = 0x80,

    // ===== Frame Exits (0x90-0x9F) =====
    /// pop a, return a
    ReturnValue = 0x90,
    /// pop n values and raise (oparg: n, 0 or 1)
    RaiseVarargs = 0x91,
    /// pop exception, raise it again
    Reraise = 0x92,

    // ===== Host-delegated (0xA0-0xAF) =====
    /// Ensure the `__annotations__` global exists
    SetupAnnotations = 0xA0,
    /// Push a host module by name (oparg: name index)
    ImportName = 0xA1,
    /// pop a, hand it to the host display hook
    PrintExpr = 0xA2,
}

/// Comparison operator carried in the argument of [`Opcode::CompareOp`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOperator {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOperator {
    /// Decode from an instruction argument
    pub fn from_arg(arg: u32) -> Option<Self> {
        match arg {
            0 => Some(Self::Lt),
            1 => Some(Self::Le),
            2 => Some(Self::Eq),
            3 => Some(Self::Ne),
            4 => Some(Self::Gt),
            5 => Some(Self::Ge),
            _ => None,
        }
    }

    /// Source-level symbol
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Arithmetic operator shared by the `Binary*` and `Inplace*` opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    TrueDivide,
    FloorDivide,
    Modulo,
    Power,
    Lshift,
    Rshift,
    And,
    Or,
    Xor,
    Subscr,
}

impl BinaryOperator {
    /// Source-level symbol
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::TrueDivide => "/",
            Self::FloorDivide => "//",
            Self::Modulo => "%",
            Self::Power => "**",
            Self::Lshift => "<<",
            Self::Rshift => ">>",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Subscr => "[]",
        }
    }
}

impl Opcode {
    /// Convert byte to opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            // Stack manipulation
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::PopTop),
            0x02 => Some(Self::RotTwo),
            0x03 => Some(Self::RotThree),
            0x04 => Some(Self::DupTop),
            0x05 => Some(Self::DupTopTwo),

            // Constants, locals, globals
            0x10 => Some(Self::LoadConst),
            0x11 => Some(Self::LoadFast),
            0x12 => Some(Self::StoreFast),
            0x13 => Some(Self::DeleteFast),
            0x14 => Some(Self::LoadGlobal),
            0x15 => Some(Self::StoreGlobal),

            // Unary
            0x20 => Some(Self::UnaryPositive),
            0x21 => Some(Self::UnaryNegative),
            0x22 => Some(Self::UnaryNot),
            0x23 => Some(Self::UnaryInvert),

            // Binary
            0x30 => Some(Self::BinaryAdd),
            0x31 => Some(Self::BinarySubtract),
            0x32 => Some(Self::BinaryMultiply),
            0x33 => Some(Self::BinaryTrueDivide),
            0x34 => Some(Self::BinaryFloorDivide),
            0x35 => Some(Self::BinaryModulo),
            0x36 => Some(Self::BinaryPower),
            0x37 => Some(Self::BinaryLshift),
            0x38 => Some(Self::BinaryRshift),
            0x39 => Some(Self::BinaryAnd),
            0x3A => Some(Self::BinaryOr),
            0x3B => Some(Self::BinaryXor),
            0x3C => Some(Self::BinarySubscr),

            // In-place
            0x40 => Some(Self::InplaceAdd),
            0x41 => Some(Self::InplaceSubtract),
            0x42 => Some(Self::InplaceMultiply),
            0x43 => Some(Self::InplaceTrueDivide),
            0x44 => Some(Self::InplaceFloorDivide),
            0x45 => Some(Self::InplaceModulo),

            // Comparisons
            0x50 => Some(Self::CompareOp),
            0x51 => Some(Self::IsOp),
            0x52 => Some(Self::ContainsOp),

            // Containers
            0x60 => Some(Self::BuildTuple),
            0x61 => Some(Self::BuildList),
            0x62 => Some(Self::BuildMap),
            0x63 => Some(Self::StoreSubscr),
            0x64 => Some(Self::DeleteSubscr),

            // Control flow
            0x70 => Some(Self::JumpForward),
            0x71 => Some(Self::JumpAbsolute),
            0x72 => Some(Self::PopJumpIfFalse),
            0x73 => Some(Self::PopJumpIfTrue),
            0x74 => Some(Self::JumpIfFalseOrPop),
            0x75 => Some(Self::JumpIfTrueOrPop),
            0x76 => Some(Self::GetIter),
            0x77 => Some(Self::ForIter),
            0x78 => Some(Self::Switch),

            // Calls
            0x80 => Some(Self::CallFunction),

            // Frame exits
            0x90 => Some(Self::ReturnValue),
            0x91 => Some(Self::RaiseVarargs),
            0x92 => Some(Self::Reraise),

            // Host-delegated
            0xA0 => Some(Self::SetupAnnotations),
            0xA1 => Some(Self::ImportName),
            0xA2 => Some(Self::PrintExpr),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::PopTop => "POP_TOP",
            Self::RotTwo => "ROT_TWO",
            Self::RotThree => "ROT_THREE",
            Self::DupTop => "DUP_TOP",
            Self::DupTopTwo => "DUP_TOP_TWO",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadFast => "LOAD_FAST",
            Self::StoreFast => "STORE_FAST",
            Self::DeleteFast => "DELETE_FAST",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::UnaryPositive => "UNARY_POSITIVE",
            Self::UnaryNegative => "UNARY_NEGATIVE",
            Self::UnaryNot => "UNARY_NOT",
            Self::UnaryInvert => "UNARY_INVERT",
            Self::BinaryAdd => "BINARY_ADD",
            Self::BinarySubtract => "BINARY_SUBTRACT",
            Self::BinaryMultiply => "BINARY_MULTIPLY",
            Self::BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            Self::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Self::BinaryModulo => "BINARY_MODULO",
            Self::BinaryPower => "BINARY_POWER",
            Self::BinaryLshift => "BINARY_LSHIFT",
            Self::BinaryRshift => "BINARY_RSHIFT",
            Self::BinaryAnd => "BINARY_AND",
            Self::BinaryOr => "BINARY_OR",
            Self::BinaryXor => "BINARY_XOR",
            Self::BinarySubscr => "BINARY_SUBSCR",
            Self::InplaceAdd => "INPLACE_ADD",
            Self::InplaceSubtract => "INPLACE_SUBTRACT",
            Self::InplaceMultiply => "INPLACE_MULTIPLY",
            Self::InplaceTrueDivide => "INPLACE_TRUE_DIVIDE",
            Self::InplaceFloorDivide => "INPLACE_FLOOR_DIVIDE",
            Self::InplaceModulo => "INPLACE_MODULO",
            Self::CompareOp => "COMPARE_OP",
            Self::IsOp => "IS_OP",
            Self::ContainsOp => "CONTAINS_OP",
            Self::BuildTuple => "BUILD_TUPLE",
            Self::BuildList => "BUILD_LIST",
            Self::BuildMap => "BUILD_MAP",
            Self::StoreSubscr => "STORE_SUBSCR",
            Self::DeleteSubscr => "DELETE_SUBSCR",
            Self::JumpForward => "JUMP_FORWARD",
            Self::JumpAbsolute => "JUMP_ABSOLUTE",
            Self::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Self::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Self::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Self::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Self::GetIter => "GET_ITER",
            Self::ForIter => "FOR_ITER",
            Self::Switch => "SWITCH",
            Self::CallFunction => "CALL_FUNCTION",
            Self::ReturnValue => "RETURN_VALUE",
            Self::RaiseVarargs => "RAISE_VARARGS",
            Self::Reraise => "RERAISE",
            Self::SetupAnnotations => "SETUP_ANNOTATIONS",
            Self::ImportName => "IMPORT_NAME",
            Self::PrintExpr => "PRINT_EXPR",
        }
    }

    /// Check if this opcode carries an instruction-index jump target
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward
                | Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::ForIter
        )
    }

    /// Check if this is an unconditional jump
    pub fn is_unconditional_jump(self) -> bool {
        matches!(self, Self::JumpForward | Self::JumpAbsolute)
    }

    /// Check if this is a two-way conditional branch
    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::ForIter
        )
    }

    /// Check if this opcode leaves the frame
    pub fn is_frame_exit(self) -> bool {
        matches!(self, Self::ReturnValue | Self::RaiseVarargs | Self::Reraise)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        self.is_frame_exit() || self.is_unconditional_jump()
    }

    /// Check if this opcode ends a basic block
    pub fn ends_block(self) -> bool {
        self.is_terminator() || self.is_conditional_branch() || self == Self::Switch
    }

    /// Check if the argument indexes the local variable array
    pub fn uses_local(self) -> bool {
        matches!(self, Self::LoadFast | Self::StoreFast | Self::DeleteFast)
    }

    /// Check if the argument indexes the name table
    pub fn uses_name(self) -> bool {
        matches!(self, Self::LoadGlobal | Self::StoreGlobal | Self::ImportName)
    }

    /// Check if the opcode is executed only by the host (no static stack-effect rule)
    pub fn is_host_delegated(self) -> bool {
        matches!(self, Self::SetupAnnotations | Self::ImportName | Self::PrintExpr)
    }

    /// Arithmetic operator for `Binary*` and `Inplace*` opcodes
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        match self {
            Self::BinaryAdd | Self::InplaceAdd => Some(BinaryOperator::Add),
            Self::BinarySubtract | Self::InplaceSubtract => Some(BinaryOperator::Subtract),
            Self::BinaryMultiply | Self::InplaceMultiply => Some(BinaryOperator::Multiply),
            Self::BinaryTrueDivide | Self::InplaceTrueDivide => Some(BinaryOperator::TrueDivide),
            Self::BinaryFloorDivide | Self::InplaceFloorDivide => Some(BinaryOperator::FloorDivide),
            Self::BinaryModulo | Self::InplaceModulo => Some(BinaryOperator::Modulo),
            Self::BinaryPower => Some(BinaryOperator::Power),
            Self::BinaryLshift => Some(BinaryOperator::Lshift),
            Self::BinaryRshift => Some(BinaryOperator::Rshift),
            Self::BinaryAnd => Some(BinaryOperator::And),
            Self::BinaryOr => Some(BinaryOperator::Or),
            Self::BinaryXor => Some(BinaryOperator::Xor),
            Self::BinarySubscr => Some(BinaryOperator::Subscr),
            _ => None,
        }
    }

    /// Number of operands whose runtime kinds are profiled at this opcode
    ///
    /// Operand positions count from the top of the stack (0 = TOS).
    pub fn profiled_operands(self) -> usize {
        if self.binary_operator().is_some() {
            return 2;
        }
        match self {
            Self::CompareOp => 2,
            Self::UnaryPositive
            | Self::UnaryNegative
            | Self::UnaryNot
            | Self::UnaryInvert
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte, "Failed roundtrip for {:?}", op);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x06), None);
        assert_eq!(Opcode::from_u8(0xFE), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(Opcode::Nop.name(), "NOP");
        assert_eq!(Opcode::BinaryAdd.name(), "BINARY_ADD");
        assert_eq!(Opcode::PopJumpIfFalse.to_string(), "POP_JUMP_IF_FALSE");
    }

    #[test]
    fn test_terminator_detection() {
        assert!(Opcode::ReturnValue.is_terminator());
        assert!(Opcode::RaiseVarargs.is_terminator());
        assert!(Opcode::JumpAbsolute.is_terminator());
        assert!(!Opcode::PopJumpIfFalse.is_terminator());
        assert!(Opcode::PopJumpIfFalse.ends_block());
        assert!(Opcode::Switch.ends_block());
        assert!(!Opcode::BinaryAdd.ends_block());
    }

    #[test]
    fn test_binary_operator_mapping() {
        assert_eq!(Opcode::BinaryAdd.binary_operator(), Some(BinaryOperator::Add));
        assert_eq!(Opcode::InplaceAdd.binary_operator(), Some(BinaryOperator::Add));
        assert_eq!(Opcode::CompareOp.binary_operator(), None);
        assert_eq!(Opcode::BinaryAdd.profiled_operands(), 2);
        assert_eq!(Opcode::UnaryNot.profiled_operands(), 1);
        assert_eq!(Opcode::JumpIfTrueOrPop.profiled_operands(), 1);
        assert_eq!(Opcode::JumpIfFalseOrPop.profiled_operands(), 1);
        assert_eq!(Opcode::LoadFast.profiled_operands(), 0);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Opcode::LoadFast).unwrap();
        assert_eq!(json, "\"LOAD_FAST\"");
        let op: Opcode = serde_json::from_str("\"POP_JUMP_IF_TRUE\"").unwrap();
        assert_eq!(op, Opcode::PopJumpIfTrue);
    }
}

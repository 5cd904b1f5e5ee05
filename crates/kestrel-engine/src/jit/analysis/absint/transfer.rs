//! Per-opcode transfer functions
//!
//! `transfer` applies an instruction's fall-through stack effect. The
//! edge-specific effects of `JumpIfFalseOrPop`, `JumpIfTrueOrPop` and
//! `ForIter` on their taken edge are derived from the pre-state by the
//! fixpoint driver.

use super::state::{FrameState, LocalEntry, StackEntry};
use super::AnalysisError;
use crate::jit::analysis::lattice::AbstractValue;
use kestrel_bytecode::{BinaryOperator, BytecodeUnit, Instruction, Kind, Opcode};

/// Result of applying one instruction
pub(crate) enum Effect {
    /// Control continues to the next instruction or along the block's edges
    Continue,
    /// Frame returns the given value
    Return(AbstractValue),
    /// Frame raises
    Raise,
}

fn int_like(kind: Kind) -> bool {
    matches!(kind, Kind::Integer | Kind::Boolean)
}

fn number(kind: Kind) -> bool {
    int_like(kind) || kind == Kind::Float
}

fn text_or_sequence(kind: Kind) -> bool {
    kind == Kind::String || kind.is_sequence()
}

/// Result kind of a binary operator on two concrete kinds
///
/// `None` when the result kind is not determined by the operand kinds.
pub fn binary_kind(op: BinaryOperator, lhs: Kind, rhs: Kind) -> Option<Kind> {
    use BinaryOperator::*;

    let both_int = int_like(lhs) && int_like(rhs);
    let both_numeric = number(lhs) && number(rhs);

    match op {
        Add | Subtract | Multiply | FloorDivide | Modulo if both_int => Some(Kind::Integer),
        Add | Subtract | Multiply | FloorDivide | Modulo if both_numeric => Some(Kind::Float),
        Add if lhs == rhs && text_or_sequence(lhs) => Some(lhs),
        Multiply if text_or_sequence(lhs) && int_like(rhs) => Some(lhs),
        Multiply if int_like(lhs) && text_or_sequence(rhs) => Some(rhs),
        Modulo if lhs == Kind::String => Some(Kind::String),
        TrueDivide if both_numeric => Some(Kind::Float),
        // Integer powers may produce a float for negative exponents
        Power if both_numeric && !both_int => Some(Kind::Float),
        Lshift | Rshift if both_int => Some(Kind::Integer),
        And | Or | Xor if lhs == Kind::Boolean && rhs == Kind::Boolean => Some(Kind::Boolean),
        And | Or | Xor if both_int => Some(Kind::Integer),
        Subscr if lhs == Kind::String && int_like(rhs) => Some(Kind::String),
        _ => None,
    }
}

/// Abstract result of a binary operator
pub fn binary_result(op: BinaryOperator, lhs: AbstractValue, rhs: AbstractValue) -> AbstractValue {
    match (lhs.concrete_kind(), rhs.concrete_kind()) {
        (Some(a), Some(b)) => binary_kind(op, a, b).map_or(AbstractValue::Top, AbstractValue::Known),
        _ => AbstractValue::Top,
    }
}

/// Abstract result of a unary opcode
pub fn unary_result(opcode: Opcode, operand: AbstractValue) -> AbstractValue {
    if opcode == Opcode::UnaryNot {
        return AbstractValue::Known(Kind::Boolean);
    }
    let kind = match (opcode, operand.concrete_kind()) {
        (Opcode::UnaryPositive | Opcode::UnaryNegative, Some(Kind::Float)) => Kind::Float,
        (
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryInvert,
            Some(Kind::Integer | Kind::Boolean),
        ) => Kind::Integer,
        _ => return AbstractValue::Top,
    };
    AbstractValue::Known(kind)
}

/// Abstract result of `CompareOp`
///
/// Builtin kinds always compare to a boolean; generic objects may not.
pub fn compare_result(lhs: AbstractValue, rhs: AbstractValue) -> AbstractValue {
    match (lhs.concrete_kind(), rhs.concrete_kind()) {
        (Some(a), Some(b)) if a != Kind::Object && b != Kind::Object => {
            AbstractValue::Known(Kind::Boolean)
        }
        _ => AbstractValue::Top,
    }
}

/// Apply the fall-through effect of `instr` at `index` to `state`
pub(crate) fn transfer(
    unit: &BytecodeUnit,
    index: usize,
    instr: &Instruction,
    state: &mut FrameState,
) -> Result<Effect, AnalysisError> {
    let arg = instr.arg as usize;
    let known = |kind: Kind| StackEntry::produced(AbstractValue::Known(kind), index);
    let top = || StackEntry::produced(AbstractValue::Top, index);

    match instr.opcode {
        Opcode::Nop
        | Opcode::JumpForward
        | Opcode::JumpAbsolute => {}

        Opcode::PopTop
        | Opcode::StoreGlobal
        | Opcode::PopJumpIfFalse
        | Opcode::PopJumpIfTrue
        | Opcode::JumpIfFalseOrPop
        | Opcode::JumpIfTrueOrPop
        | Opcode::Switch => {
            state.pop(index)?;
        }

        Opcode::RotTwo => {
            let mut top_two = state.pop_n(2, index)?;
            top_two.reverse();
            state.stack.extend(top_two);
        }
        Opcode::RotThree => {
            let mut top_three = state.pop_n(3, index)?;
            top_three.rotate_right(1);
            state.stack.extend(top_three);
        }
        Opcode::DupTop => {
            let entry = state.peek(0).cloned().ok_or(AnalysisError::StackUnderflow { index })?;
            state.push(entry);
        }
        Opcode::DupTopTwo => {
            let second = state.peek(1).cloned().ok_or(AnalysisError::StackUnderflow { index })?;
            let first = state.peek(0).cloned().ok_or(AnalysisError::StackUnderflow { index })?;
            state.push(second);
            state.push(first);
        }

        Opcode::LoadConst => {
            let kind = unit.constant(arg).map_or(Kind::Object, |c| c.kind());
            state.push(known(kind));
        }
        Opcode::LoadFast => {
            let value = match state.locals[arg].info.value {
                // Raises at runtime; anything after is unreachable in practice
                AbstractValue::Undefined | AbstractValue::Bottom => AbstractValue::Top,
                value => value,
            };
            state.push(StackEntry::produced(value, index));
        }
        Opcode::StoreFast => {
            let entry = state.pop(index)?;
            state.locals[arg] = LocalEntry::stored(entry.value, index);
        }
        Opcode::DeleteFast => {
            state.locals[arg] = LocalEntry::unassigned();
        }
        Opcode::LoadGlobal => state.push(top()),

        Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryNot | Opcode::UnaryInvert => {
            let operand = state.pop(index)?;
            let value = unary_result(instr.opcode, operand.value);
            state.push(StackEntry::produced(value, index));
        }

        op if op.binary_operator().is_some() => {
            let operands = state.pop_n(2, index)?;
            let value = match op.binary_operator() {
                Some(operator) => binary_result(operator, operands[0].value, operands[1].value),
                None => AbstractValue::Top,
            };
            state.push(StackEntry::produced(value, index));
        }

        Opcode::CompareOp => {
            let operands = state.pop_n(2, index)?;
            let value = compare_result(operands[0].value, operands[1].value);
            state.push(StackEntry::produced(value, index));
        }
        Opcode::IsOp | Opcode::ContainsOp => {
            state.pop_n(2, index)?;
            state.push(known(Kind::Boolean));
        }

        Opcode::BuildTuple => {
            state.pop_n(arg, index)?;
            state.push(known(Kind::Tuple));
        }
        Opcode::BuildList => {
            state.pop_n(arg, index)?;
            state.push(known(Kind::List));
        }
        Opcode::BuildMap => {
            state.pop_n(arg * 2, index)?;
            state.push(known(Kind::Dict));
        }
        Opcode::StoreSubscr => {
            state.pop_n(3, index)?;
        }
        Opcode::DeleteSubscr => {
            state.pop_n(2, index)?;
        }

        Opcode::GetIter => {
            state.pop(index)?;
            state.push(known(Kind::Iterator));
        }
        Opcode::ForIter => {
            if state.peek(0).is_none() {
                return Err(AnalysisError::StackUnderflow { index });
            }
            state.push(top());
        }

        Opcode::CallFunction => {
            state.pop_n(arg + 1, index)?;
            state.push(top());
        }

        Opcode::ReturnValue => {
            let value = state.pop(index)?;
            return Ok(Effect::Return(value.value));
        }
        Opcode::RaiseVarargs => {
            state.pop_n(arg, index)?;
            return Ok(Effect::Raise);
        }
        Opcode::Reraise => {
            state.pop(index)?;
            return Ok(Effect::Raise);
        }

        op => {
            debug_assert!(op.is_host_delegated());
            return Err(AnalysisError::UnsupportedOpcode { opcode: op, index });
        }
    }

    Ok(Effect::Continue)
}

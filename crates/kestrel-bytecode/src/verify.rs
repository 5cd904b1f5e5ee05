//! Structural unit verification

use crate::opcode::{CompareOperator, Opcode};
use crate::unit::BytecodeUnit;

/// Unit verification errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// More arguments than local slots
    #[error("Argument count {arg_count} exceeds local count {local_count}")]
    TooManyArguments { arg_count: usize, local_count: usize },

    /// Declared parameter kinds for non-arguments
    #[error("{declared} parameter kinds declared for {arg_count} arguments")]
    TooManyParamKinds { declared: usize, arg_count: usize },

    /// Invalid jump target
    #[error("Invalid jump target {target} at instruction {index}")]
    InvalidJumpTarget { target: usize, index: usize },

    /// Forward jump whose target is not ahead of it
    #[error("JUMP_FORWARD at instruction {index} targets {target}, which is not ahead")]
    BackwardForwardJump { target: usize, index: usize },

    /// Invalid constant pool reference
    #[error("Invalid constant pool reference: index {constant} at instruction {index}")]
    InvalidConstantRef { constant: usize, index: usize },

    /// Invalid name table reference
    #[error("Invalid name reference: index {name} at instruction {index}")]
    InvalidNameRef { name: usize, index: usize },

    /// Invalid local variable reference
    #[error("Invalid local variable reference: index {local} (max {max}) at instruction {index}")]
    InvalidLocalRef {
        local: usize,
        max: usize,
        index: usize,
    },

    /// Argument out of range for the opcode
    #[error("Invalid argument {arg} for {opcode} at instruction {index}")]
    InvalidArgument {
        opcode: Opcode,
        arg: u32,
        index: usize,
    },

    /// Switch references a missing jump table
    #[error("Invalid jump table {table} at instruction {index}")]
    InvalidJumpTable { table: usize, index: usize },

    /// Jump table entry outside the instruction stream
    #[error("Jump table {table} targets {target}, outside the unit")]
    InvalidJumpTableTarget { table: usize, target: usize },

    /// Malformed exception handler entry
    #[error("Invalid exception handler {handler}: {reason}")]
    InvalidHandler { handler: usize, reason: &'static str },
}

/// Verify a unit's structure
///
/// Checks every table reference and control transfer. Stack discipline is
/// left to the analysis, which reports inconsistent depths itself.
pub fn verify_unit(unit: &BytecodeUnit) -> Result<(), VerifyError> {
    if unit.arg_count() > unit.local_count() {
        return Err(VerifyError::TooManyArguments {
            arg_count: unit.arg_count(),
            local_count: unit.local_count(),
        });
    }
    if unit.param_kinds().len() > unit.arg_count() {
        return Err(VerifyError::TooManyParamKinds {
            declared: unit.param_kinds().len(),
            arg_count: unit.arg_count(),
        });
    }

    for (index, instr) in unit.instructions().iter().enumerate() {
        verify_instruction(unit, index, instr.opcode, instr.arg)?;
    }

    verify_jump_tables(unit)?;
    verify_handlers(unit)?;

    Ok(())
}

fn verify_instruction(
    unit: &BytecodeUnit,
    index: usize,
    opcode: Opcode,
    arg: u32,
) -> Result<(), VerifyError> {
    let len = unit.len();
    let target = arg as usize;

    if opcode.is_jump() {
        if target >= len {
            return Err(VerifyError::InvalidJumpTarget { target, index });
        }
        if opcode == Opcode::JumpForward && target <= index {
            return Err(VerifyError::BackwardForwardJump { target, index });
        }
    }

    match opcode {
        Opcode::LoadConst if target >= unit.constants().len() => {
            Err(VerifyError::InvalidConstantRef {
                constant: target,
                index,
            })
        }
        op if op.uses_name() && target >= unit.names().len() => {
            Err(VerifyError::InvalidNameRef {
                name: target,
                index,
            })
        }
        op if op.uses_local() && target >= unit.local_count() => Err(VerifyError::InvalidLocalRef {
            local: target,
            max: unit.local_count(),
            index,
        }),
        Opcode::CompareOp if CompareOperator::from_arg(arg).is_none() => {
            Err(VerifyError::InvalidArgument { opcode, arg, index })
        }
        Opcode::IsOp | Opcode::ContainsOp | Opcode::RaiseVarargs if arg > 1 => {
            Err(VerifyError::InvalidArgument { opcode, arg, index })
        }
        Opcode::Switch if unit.jump_table(target).is_none() => {
            Err(VerifyError::InvalidJumpTable {
                table: target,
                index,
            })
        }
        _ => Ok(()),
    }
}

fn verify_jump_tables(unit: &BytecodeUnit) -> Result<(), VerifyError> {
    for (table, targets) in unit.jump_tables().iter().enumerate() {
        if let Some(&target) = targets.iter().find(|&&t| t >= unit.len()) {
            return Err(VerifyError::InvalidJumpTableTarget { table, target });
        }
    }
    Ok(())
}

fn verify_handlers(unit: &BytecodeUnit) -> Result<(), VerifyError> {
    for (handler, entry) in unit.handlers().iter().enumerate() {
        if entry.start >= entry.end {
            return Err(VerifyError::InvalidHandler {
                handler,
                reason: "empty protected range",
            });
        }
        if entry.end > unit.len() {
            return Err(VerifyError::InvalidHandler {
                handler,
                reason: "protected range extends past the unit",
            });
        }
        if entry.target >= unit.len() {
            return Err(VerifyError::InvalidHandler {
                handler,
                reason: "handler target outside the unit",
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{Constant, ExceptionHandler, RawInstruction, UnitDef};

    fn raw(op: Opcode, arg: u32) -> RawInstruction {
        RawInstruction { op, arg }
    }

    fn unit_with(code: Vec<RawInstruction>) -> BytecodeUnit {
        BytecodeUnit::new(UnitDef {
            name: "t".into(),
            arg_count: 1,
            local_count: 1,
            constants: vec![Constant::Int(1)],
            names: vec!["g".into()],
            code,
            ..Default::default()
        })
    }

    #[test]
    fn test_verify_simple_unit() {
        let unit = unit_with(vec![
            raw(Opcode::LoadFast, 0),
            raw(Opcode::LoadConst, 0),
            raw(Opcode::BinaryAdd, 0),
            raw(Opcode::ReturnValue, 0),
        ]);
        assert_eq!(verify_unit(&unit), Ok(()));
    }

    #[test]
    fn test_verify_empty_unit() {
        assert_eq!(verify_unit(&unit_with(vec![])), Ok(()));
    }

    #[test]
    fn test_verify_jump_out_of_range() {
        let unit = unit_with(vec![raw(Opcode::JumpAbsolute, 7)]);
        assert_eq!(
            verify_unit(&unit),
            Err(VerifyError::InvalidJumpTarget { target: 7, index: 0 })
        );
    }

    #[test]
    fn test_verify_backward_forward_jump() {
        let unit = unit_with(vec![raw(Opcode::Nop, 0), raw(Opcode::JumpForward, 0)]);
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::BackwardForwardJump { .. })
        ));
    }

    #[test]
    fn test_verify_invalid_refs() {
        let unit = unit_with(vec![raw(Opcode::LoadConst, 3)]);
        assert!(matches!(verify_unit(&unit), Err(VerifyError::InvalidConstantRef { .. })));

        let unit = unit_with(vec![raw(Opcode::LoadGlobal, 1)]);
        assert!(matches!(verify_unit(&unit), Err(VerifyError::InvalidNameRef { .. })));

        let unit = unit_with(vec![raw(Opcode::StoreFast, 1)]);
        assert!(matches!(verify_unit(&unit), Err(VerifyError::InvalidLocalRef { .. })));

        let unit = unit_with(vec![raw(Opcode::CompareOp, 9)]);
        assert!(matches!(verify_unit(&unit), Err(VerifyError::InvalidArgument { .. })));

        let unit = unit_with(vec![raw(Opcode::Switch, 0)]);
        assert!(matches!(verify_unit(&unit), Err(VerifyError::InvalidJumpTable { .. })));
    }

    #[test]
    fn test_verify_handlers() {
        let unit = BytecodeUnit::new(UnitDef {
            name: "h".into(),
            code: vec![raw(Opcode::Nop, 0), raw(Opcode::Nop, 0)],
            handlers: vec![ExceptionHandler { start: 1, end: 1, target: 0, depth: 0 }],
            ..Default::default()
        });
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::InvalidHandler { handler: 0, .. })
        ));
    }

    #[test]
    fn test_verify_argument_count() {
        let unit = BytecodeUnit::new(UnitDef {
            name: "args".into(),
            arg_count: 2,
            param_kinds: vec![None, None, None],
            code: vec![],
            ..Default::default()
        });
        assert!(matches!(
            verify_unit(&unit),
            Err(VerifyError::TooManyParamKinds { declared: 3, arg_count: 2 })
        ));
    }
}

use super::arithmetic::{
    binary_op, compare_values, contains, delete_subscript, store_subscript, unary_op,
};
use super::{OpcodeResult, ReferenceInterpreter};
use crate::vm::error::{ExceptionKind, RuntimeError};
use crate::vm::frame::Frame;
use crate::vm::namespace::{Namespace, ANNOTATIONS};
use crate::vm::value::{Value, ValueIter};
use kestrel_bytecode::{CompareOperator, Instruction, Opcode};
use std::sync::Arc;

fn name_of<'u>(frame: &'u Frame, index: u32) -> Result<&'u str, RuntimeError> {
    frame
        .unit
        .name_at(index as usize)
        .ok_or_else(|| RuntimeError::internal(format!("invalid name index {}", index)))
}

fn iterate(value: Value) -> Result<Value, RuntimeError> {
    let items = match &value {
        Value::Iterator(_) => return Ok(value),
        Value::List(items) => items.lock().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(s) => s.chars().map(|c| Value::str(&c.to_string())).collect(),
        Value::Dict(pairs) => pairs.lock().iter().map(|(k, _)| k.clone()).collect(),
        other => {
            return Err(RuntimeError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(Value::iterator(ValueIter::Items { items, position: 0 }))
}

impl ReferenceInterpreter {
    pub(super) fn execute(
        &self,
        frame: &mut Frame,
        namespace: &Namespace,
        instr: &Instruction,
    ) -> Result<OpcodeResult, RuntimeError> {
        let arg = instr.arg as usize;

        match instr.opcode {
            // =========================================================
            // Stack
            // =========================================================
            Opcode::Nop => {}
            Opcode::PopTop => {
                frame.pop()?;
            }
            Opcode::RotTwo => {
                let mut top_two = frame.pop_n(2)?;
                top_two.reverse();
                frame.stack.extend(top_two);
            }
            Opcode::RotThree => {
                let mut top_three = frame.pop_n(3)?;
                top_three.rotate_right(1);
                frame.stack.extend(top_three);
            }
            Opcode::DupTop => {
                let top = frame.peek(0).cloned().ok_or_else(|| {
                    RuntimeError::internal(format!("stack underflow at {}", frame.pc))
                })?;
                frame.push(top);
            }
            Opcode::DupTopTwo => {
                let top_two = frame.pop_n(2)?;
                frame.stack.extend(top_two.iter().cloned());
                frame.stack.extend(top_two);
            }

            // =========================================================
            // Constants and variables
            // =========================================================
            Opcode::LoadConst => {
                let value = frame
                    .unit
                    .constant(arg)
                    .map(Value::from)
                    .ok_or_else(|| RuntimeError::internal(format!("invalid constant {}", arg)))?;
                frame.push(value);
            }
            Opcode::LoadFast => {
                let value = frame.locals.get(arg).cloned().flatten().ok_or_else(|| {
                    RuntimeError::new(
                        ExceptionKind::UnboundLocalError,
                        format!("local variable {} referenced before assignment", arg),
                    )
                })?;
                frame.push(value);
            }
            Opcode::StoreFast => {
                let value = frame.pop()?;
                let slot = frame
                    .locals
                    .get_mut(arg)
                    .ok_or_else(|| RuntimeError::internal(format!("invalid local {}", arg)))?;
                *slot = Some(value);
            }
            Opcode::DeleteFast => {
                let slot = frame.locals.get_mut(arg).and_then(Option::take);
                if slot.is_none() {
                    return Err(RuntimeError::new(
                        ExceptionKind::UnboundLocalError,
                        format!("local variable {} referenced before assignment", arg),
                    ));
                }
            }
            Opcode::LoadGlobal => {
                let name = name_of(frame, instr.arg)?;
                let value = namespace.lookup(name).ok_or_else(|| {
                    RuntimeError::new(
                        ExceptionKind::NameError,
                        format!("name '{}' is not defined", name),
                    )
                })?;
                frame.push(value);
            }
            Opcode::StoreGlobal => {
                let value = frame.pop()?;
                let name = name_of(frame, instr.arg)?.to_string();
                namespace.set_global(&name, value);
            }

            // =========================================================
            // Arithmetic and comparison
            // =========================================================
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryNot | Opcode::UnaryInvert => {
                let operand = frame.pop()?;
                frame.push(unary_op(instr.opcode, &operand)?);
            }
            op if op.binary_operator().is_some() => {
                let operands = frame.pop_n(2)?;
                let operator = op
                    .binary_operator()
                    .ok_or_else(|| RuntimeError::internal(format!("{} has no operator", op)))?;
                frame.push(binary_op(operator, &operands[0], &operands[1])?);
            }
            Opcode::CompareOp => {
                let operator = CompareOperator::from_arg(instr.arg).ok_or_else(|| {
                    RuntimeError::internal(format!("invalid comparison {}", instr.arg))
                })?;
                let operands = frame.pop_n(2)?;
                let result = compare_values(operator, &operands[0], &operands[1])?;
                frame.push(Value::Bool(result));
            }
            Opcode::IsOp => {
                let operands = frame.pop_n(2)?;
                let same = operands[0].is(&operands[1]);
                frame.push(Value::Bool(same != (arg == 1)));
            }
            Opcode::ContainsOp => {
                let container = frame.pop()?;
                let item = frame.pop()?;
                let found = contains(&container, &item)?;
                frame.push(Value::Bool(found != (arg == 1)));
            }

            // =========================================================
            // Containers
            // =========================================================
            Opcode::BuildTuple => {
                let items = frame.pop_n(arg)?;
                frame.push(Value::tuple(items));
            }
            Opcode::BuildList => {
                let items = frame.pop_n(arg)?;
                frame.push(Value::list(items));
            }
            Opcode::BuildMap => {
                let flat = frame.pop_n(arg * 2)?;
                let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(arg);
                for pair in flat.chunks_exact(2) {
                    match pairs.iter_mut().find(|(k, _)| k.equals(&pair[0])) {
                        Some(entry) => entry.1 = pair[1].clone(),
                        None => pairs.push((pair[0].clone(), pair[1].clone())),
                    }
                }
                frame.push(Value::dict(pairs));
            }
            Opcode::StoreSubscr => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                let value = frame.pop()?;
                store_subscript(&container, &index, value)?;
            }
            Opcode::DeleteSubscr => {
                let index = frame.pop()?;
                let container = frame.pop()?;
                delete_subscript(&container, &index)?;
            }

            // =========================================================
            // Control flow
            // =========================================================
            Opcode::JumpForward | Opcode::JumpAbsolute => return Ok(OpcodeResult::Jump(arg)),
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let truthy = frame.pop()?.is_truthy();
                if truthy == (instr.opcode == Opcode::PopJumpIfTrue) {
                    return Ok(OpcodeResult::Jump(arg));
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let truthy = frame
                    .peek(0)
                    .map(Value::is_truthy)
                    .ok_or_else(|| RuntimeError::internal(format!("stack underflow at {}", frame.pc)))?;
                if truthy == (instr.opcode == Opcode::JumpIfTrueOrPop) {
                    return Ok(OpcodeResult::Jump(arg));
                }
                frame.pop()?;
            }
            Opcode::GetIter => {
                let value = frame.pop()?;
                frame.push(iterate(value)?);
            }
            Opcode::ForIter => {
                let next = match frame.peek(0) {
                    Some(Value::Iterator(iter)) => iter.lock().advance(),
                    Some(other) => {
                        return Err(RuntimeError::type_error(format!(
                            "'{}' object is not an iterator",
                            other.type_name()
                        )))
                    }
                    None => return Err(RuntimeError::internal(format!("stack underflow at {}", frame.pc))),
                };
                match next {
                    Some(value) => frame.push(value),
                    None => {
                        frame.pop()?;
                        return Ok(OpcodeResult::Jump(arg));
                    }
                }
            }
            Opcode::Switch => {
                let selector = frame.pop()?;
                let i = selector.as_int().ok_or_else(|| {
                    RuntimeError::type_error(format!(
                        "switch selector must be an integer, not {}",
                        selector.type_name()
                    ))
                })?;
                let target = usize::try_from(i)
                    .ok()
                    .and_then(|i| frame.unit.jump_table(arg)?.get(i).copied());
                if let Some(target) = target {
                    return Ok(OpcodeResult::Jump(target));
                }
            }

            // =========================================================
            // Calls and frame exits
            // =========================================================
            Opcode::CallFunction => {
                let args = frame.pop_n(arg)?;
                let callee = frame.pop()?;
                let result = self.call_value(&callee, args, namespace)?;
                frame.push(result);
            }
            Opcode::ReturnValue => return Ok(OpcodeResult::Return(frame.pop()?)),
            Opcode::RaiseVarargs => {
                let error = match arg {
                    0 => match &frame.current_exception {
                        Some(current) => current.as_ref().clone(),
                        None => RuntimeError::internal("no active exception to reraise"),
                    },
                    _ => {
                        let mut values = frame.pop_n(arg)?;
                        match values.swap_remove(0) {
                            Value::Exception(err) => err.as_ref().clone(),
                            payload => RuntimeError::raised(payload),
                        }
                    }
                };
                return Err(error);
            }
            Opcode::Reraise => {
                return Err(match frame.pop()? {
                    Value::Exception(err) => err.as_ref().clone(),
                    payload => RuntimeError::raised(payload),
                });
            }

            // =========================================================
            // Host-delegated
            // =========================================================
            Opcode::SetupAnnotations => {
                namespace.set_global_default(ANNOTATIONS, || Value::dict(Vec::new()));
            }
            Opcode::ImportName => {
                let name = name_of(frame, instr.arg)?;
                let module = namespace.import(name).ok_or_else(|| {
                    RuntimeError::new(
                        ExceptionKind::ImportError,
                        format!("No module named '{}'", name),
                    )
                })?;
                frame.push(module);
            }
            Opcode::PrintExpr => {
                let value = frame.pop()?;
                namespace.display(&value);
            }

            op => {
                return Err(RuntimeError::internal(format!("unhandled opcode {}", op)));
            }
        }

        Ok(OpcodeResult::Continue)
    }

    fn call_value(
        &self,
        callee: &Value,
        args: Vec<Value>,
        namespace: &Namespace,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Builtin(builtin) => (builtin.func)(args.as_slice()),
            Value::Function(unit) => match namespace.evaluator() {
                Some(evaluator) => evaluator.evaluate(unit, args, namespace),
                None => self.call(&Arc::clone(unit), args, namespace, None),
            },
            other => Err(RuntimeError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }
}

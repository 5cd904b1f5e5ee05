//! Value-level operators: arithmetic, comparison and subscripting
//!
//! Integer arithmetic is checked; overflow raises `OverflowError` instead of
//! wrapping. Result kinds agree with the analysis rule tables: two ints (or
//! bools) give an int, any float operand gives a float, true division always
//! gives a float.

use crate::vm::error::{ExceptionKind, RuntimeError};
use crate::vm::value::Value;
use kestrel_bytecode::{BinaryOperator, CompareOperator, Opcode};
use std::cmp::Ordering;

fn unsupported(op: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> RuntimeError {
    RuntimeError::overflow("integer overflow")
}

fn is_float_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        Some((a.as_float()?, b.as_float()?))
    } else {
        None
    }
}

/// Floor division rounding toward negative infinity
fn int_floor_div(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b == 0 {
        return Err(RuntimeError::zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Modulo with the sign of the divisor
fn int_mod(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b == 0 {
        return Err(RuntimeError::zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn float_mod(a: f64, b: f64) -> Result<f64, RuntimeError> {
    if b == 0.0 {
        return Err(RuntimeError::zero_division("float modulo"));
    }
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn int_pow(base: i64, exp: i64) -> Result<Value, RuntimeError> {
    if exp < 0 {
        if base == 0 {
            return Err(RuntimeError::zero_division("0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    base.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
}

fn shift_left(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b < 0 {
        return Err(RuntimeError::value_error("negative shift count"));
    }
    if a == 0 {
        return Ok(0);
    }
    if b >= 63 {
        return Err(overflow());
    }
    let shifted = a << b;
    if shifted >> b != a {
        return Err(overflow());
    }
    Ok(shifted)
}

fn shift_right(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b < 0 {
        return Err(RuntimeError::value_error("negative shift count"));
    }
    Ok(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
}

/// Longest string (in bytes) or sequence a repetition may produce
pub const MAX_REPEAT_LEN: usize = 1 << 28;

/// Length of `len` repeated `count` times, or `OverflowError` past the cap
fn repeated_len(len: usize, count: i64) -> Result<usize, RuntimeError> {
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    len.checked_mul(count)
        .filter(|&total| total <= MAX_REPEAT_LEN)
        .ok_or_else(|| RuntimeError::overflow("repeated sequence is too long"))
}

fn repeat(items: &[Value], count: i64) -> Result<Vec<Value>, RuntimeError> {
    let total = repeated_len(items.len(), count)?;
    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn sequence_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::List(items) => Some(items.lock().clone()),
        Value::Tuple(items) => Some(items.to_vec()),
        _ => None,
    }
}

/// Apply a binary operator
pub fn binary_op(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    use BinaryOperator::*;

    if op == Subscr {
        return subscript(a, b);
    }
    if op == Modulo {
        if let Value::Str(format) = a {
            return format_string(format, b).map(|s| Value::str(&s));
        }
    }

    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        let bools = matches!((a, b), (Value::Bool(_), Value::Bool(_)));
        return match op {
            Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
            Subtract => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
            Multiply => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
            TrueDivide => {
                if y == 0 {
                    return Err(RuntimeError::zero_division("division by zero"));
                }
                Ok(Value::Float(x as f64 / y as f64))
            }
            FloorDivide => int_floor_div(x, y).map(Value::Int),
            Modulo => int_mod(x, y).map(Value::Int),
            Power => int_pow(x, y),
            Lshift => shift_left(x, y).map(Value::Int),
            Rshift => shift_right(x, y).map(Value::Int),
            And if bools => Ok(Value::Bool(x & y != 0)),
            Or if bools => Ok(Value::Bool((x | y) != 0)),
            Xor if bools => Ok(Value::Bool((x ^ y) != 0)),
            And => Ok(Value::Int(x & y)),
            Or => Ok(Value::Int(x | y)),
            Xor => Ok(Value::Int(x ^ y)),
            Subscr => Err(unsupported(op.symbol(), a, b)),
        };
    }

    if let Some((x, y)) = is_float_pair(a, b) {
        return match op {
            Add => Ok(Value::Float(x + y)),
            Subtract => Ok(Value::Float(x - y)),
            Multiply => Ok(Value::Float(x * y)),
            TrueDivide | FloorDivide if y == 0.0 => {
                Err(RuntimeError::zero_division("float division by zero"))
            }
            TrueDivide => Ok(Value::Float(x / y)),
            FloorDivide => Ok(Value::Float((x / y).floor())),
            Modulo => float_mod(x, y).map(Value::Float),
            Power if x == 0.0 && y < 0.0 => Err(RuntimeError::zero_division(
                "0.0 cannot be raised to a negative power",
            )),
            Power => Ok(Value::Float(x.powf(y))),
            _ => Err(unsupported(op.symbol(), a, b)),
        };
    }

    match (op, a, b) {
        (Add, Value::Str(x), Value::Str(y)) => Ok(Value::str(&format!("{}{}", x, y))),
        (Add, Value::List(_), Value::List(_)) | (Add, Value::Tuple(_), Value::Tuple(_)) => {
            let mut items = sequence_items(a).unwrap_or_default();
            items.extend(sequence_items(b).unwrap_or_default());
            Ok(match a {
                Value::List(_) => Value::list(items),
                _ => Value::tuple(items),
            })
        }
        (Multiply, Value::Str(s), n) | (Multiply, n, Value::Str(s)) if n.as_int().is_some() => {
            let count = n.as_int().unwrap_or(0);
            let total = repeated_len(s.len(), count)?;
            Ok(Value::str(&s.repeat(if s.is_empty() { 0 } else { total / s.len() })))
        }
        (Multiply, seq @ (Value::List(_) | Value::Tuple(_)), n)
        | (Multiply, n, seq @ (Value::List(_) | Value::Tuple(_)))
            if n.as_int().is_some() =>
        {
            let items = repeat(&sequence_items(seq).unwrap_or_default(), n.as_int().unwrap_or(0))?;
            Ok(match seq {
                Value::List(_) => Value::list(items),
                _ => Value::tuple(items),
            })
        }
        _ => Err(unsupported(op.symbol(), a, b)),
    }
}

/// `%`-formatting of a string
fn format_string(format: &str, args: &Value) -> Result<String, RuntimeError> {
    let args: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut args = args.into_iter();
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(spec @ ('s' | 'd' | 'r')) => {
                let arg = args.next().ok_or_else(|| {
                    RuntimeError::type_error("not enough arguments for format string")
                })?;
                match spec {
                    'r' => out.push_str(&arg.repr()),
                    'd' => match (&arg, arg.as_int()) {
                        (Value::Float(x), _) => out.push_str(&format!("{}", x.trunc() as i64)),
                        (_, Some(i)) => out.push_str(&i.to_string()),
                        _ => {
                            return Err(RuntimeError::type_error(format!(
                                "%d format: a number is required, not {}",
                                arg.type_name()
                            )))
                        }
                    },
                    _ => out.push_str(&arg.to_string()),
                }
            }
            other => {
                return Err(RuntimeError::value_error(format!(
                    "unsupported format character {:?}",
                    other.unwrap_or('%')
                )))
            }
        }
    }
    if args.next().is_some() {
        return Err(RuntimeError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// Apply a unary opcode
pub fn unary_op(opcode: Opcode, a: &Value) -> Result<Value, RuntimeError> {
    match (opcode, a) {
        (Opcode::UnaryNot, _) => Ok(Value::Bool(!a.is_truthy())),
        (Opcode::UnaryPositive, Value::Float(x)) => Ok(Value::Float(*x)),
        (Opcode::UnaryNegative, Value::Float(x)) => Ok(Value::Float(-x)),
        (Opcode::UnaryPositive, _) if a.as_int().is_some() => Ok(Value::Int(a.as_int().unwrap_or(0))),
        (Opcode::UnaryNegative, _) if a.as_int().is_some() => a
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (Opcode::UnaryInvert, _) if a.as_int().is_some() => Ok(Value::Int(!a.as_int().unwrap_or(0))),
        _ => Err(RuntimeError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            opcode,
            a.type_name()
        ))),
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(_), Value::List(_)) | (Value::Tuple(_), Value::Tuple(_)) => {
            let (xs, ys) = (sequence_items(a)?, sequence_items(b)?);
            for (x, y) in xs.iter().zip(&ys) {
                if !x.equals(y) {
                    return ordering(x, y);
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        _ => None,
    }
}

/// Evaluate a rich comparison
pub fn compare_values(op: CompareOperator, a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    match op {
        CompareOperator::Eq => return Ok(a.equals(b)),
        CompareOperator::Ne => return Ok(!a.equals(b)),
        _ => {}
    }
    let unordered = || {
        RuntimeError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))
    };
    let is_float = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
    let order = match ordering(a, b) {
        Some(order) => order,
        // NaN compares false both ways
        None if is_float && a.as_float().is_some() && b.as_float().is_some() => return Ok(false),
        None => return Err(unordered()),
    };
    Ok(match op {
        CompareOperator::Lt => order == Ordering::Less,
        CompareOperator::Le => order != Ordering::Greater,
        CompareOperator::Gt => order == Ordering::Greater,
        CompareOperator::Ge => order != Ordering::Less,
        CompareOperator::Eq | CompareOperator::Ne => false,
    })
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> Result<bool, RuntimeError> {
    match container {
        Value::List(items) => Ok(items.lock().iter().any(|v| v.equals(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Dict(pairs) => Ok(pairs.lock().iter().any(|(k, _)| k.equals(item))),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(RuntimeError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        other => Err(RuntimeError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: &Value, len: usize, what: &str) -> Result<usize, RuntimeError> {
    let i = index.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{} indices must be integers, not {}",
            what,
            index.type_name()
        ))
    })?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::index_error(format!("{} index out of range", what)));
    }
    Ok(resolved as usize)
}

fn key_error(key: &Value) -> RuntimeError {
    RuntimeError::new(ExceptionKind::KeyError, key.repr())
}

/// `container[index]`
pub fn subscript(container: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let items = items.lock();
            let i = normalize_index(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index, chars.len(), "string")?;
            Ok(Value::str(&chars[i].to_string()))
        }
        Value::Dict(pairs) => pairs
            .lock()
            .iter()
            .find(|(k, _)| k.equals(index))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| key_error(index)),
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[index] = value`
pub fn store_subscript(container: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
    match container {
        Value::List(items) => {
            let mut items = items.lock();
            let i = normalize_index(index, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(pairs) => {
            let mut pairs = pairs.lock();
            match pairs.iter_mut().find(|(k, _)| k.equals(index)) {
                Some(entry) => entry.1 = value,
                None => pairs.push((index.clone(), value)),
            }
            Ok(())
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `del container[index]`
pub fn delete_subscript(container: &Value, index: &Value) -> Result<(), RuntimeError> {
    match container {
        Value::List(items) => {
            let mut items = items.lock();
            let i = normalize_index(index, items.len(), "list assignment")?;
            items.remove(i);
            Ok(())
        }
        Value::Dict(pairs) => {
            let mut pairs = pairs.lock();
            let position = pairs
                .iter()
                .position(|(k, _)| k.equals(index))
                .ok_or_else(|| key_error(index))?;
            pairs.remove(position);
            Ok(())
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_bytecode::Kind;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_integer_ops() {
        assert!(binary_op(BinaryOperator::Add, &int(2), &int(3)).unwrap().equals(&int(5)));
        assert!(binary_op(BinaryOperator::FloorDivide, &int(-7), &int(2)).unwrap().equals(&int(-4)));
        assert!(binary_op(BinaryOperator::Modulo, &int(-7), &int(2)).unwrap().equals(&int(1)));
        assert!(binary_op(BinaryOperator::Lshift, &int(1), &int(10)).unwrap().equals(&int(1024)));
        assert_eq!(
            binary_op(BinaryOperator::TrueDivide, &int(1), &int(2)).unwrap().kind(),
            Kind::Float
        );
    }

    #[test]
    fn test_overflow_raises() {
        let err = binary_op(BinaryOperator::Add, &int(i64::MAX), &int(1)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OverflowError);
        let err = binary_op(BinaryOperator::Lshift, &int(1), &int(63)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OverflowError);
    }

    #[test]
    fn test_zero_division() {
        for op in [BinaryOperator::TrueDivide, BinaryOperator::FloorDivide, BinaryOperator::Modulo] {
            let err = binary_op(op, &int(1), &int(0)).unwrap_err();
            assert_eq!(err.kind, ExceptionKind::ZeroDivisionError);
        }
    }

    #[test]
    fn test_bool_ops() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        assert_eq!(binary_op(BinaryOperator::And, &t, &f).unwrap().kind(), Kind::Boolean);
        assert_eq!(binary_op(BinaryOperator::Add, &t, &t).unwrap().kind(), Kind::Integer);
    }

    #[test]
    fn test_power_kinds() {
        assert_eq!(binary_op(BinaryOperator::Power, &int(2), &int(-1)).unwrap().kind(), Kind::Float);
        assert!(binary_op(BinaryOperator::Power, &int(2), &int(10)).unwrap().equals(&int(1024)));
    }

    #[test]
    fn test_sequences() {
        let joined = binary_op(BinaryOperator::Add, &Value::str("ab"), &Value::str("c")).unwrap();
        assert_eq!(joined.to_string(), "abc");
        let repeated = binary_op(BinaryOperator::Multiply, &int(2), &Value::list(vec![int(1)])).unwrap();
        assert_eq!(repeated.to_string(), "[1, 1]");
        let err = binary_op(BinaryOperator::Add, &Value::list(vec![]), &Value::tuple(vec![])).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
    }

    #[test]
    fn test_string_format() {
        let args = Value::tuple(vec![Value::str("x"), int(3)]);
        let out = binary_op(BinaryOperator::Modulo, &Value::str("%s=%d%%"), &args).unwrap();
        assert_eq!(out.to_string(), "x=3%");
        assert!(binary_op(BinaryOperator::Modulo, &Value::str("%s %s"), &int(1)).is_err());
    }

    #[test]
    fn test_compare() {
        assert!(compare_values(CompareOperator::Lt, &int(1), &Value::Float(1.5)).unwrap());
        assert!(compare_values(CompareOperator::Ge, &Value::str("b"), &Value::str("a")).unwrap());
        assert!(compare_values(CompareOperator::Lt, &int(1), &Value::str("a")).is_err());
        assert!(!compare_values(CompareOperator::Eq, &int(1), &Value::str("a")).unwrap());
        assert!(!compare_values(CompareOperator::Lt, &Value::Float(f64::NAN), &int(1)).unwrap());
    }

    #[test]
    fn test_subscripts() {
        let list = Value::list(vec![int(1), int(2)]);
        assert!(subscript(&list, &int(-1)).unwrap().equals(&int(2)));
        store_subscript(&list, &int(0), int(9)).unwrap();
        assert_eq!(list.to_string(), "[9, 2]");
        delete_subscript(&list, &int(0)).unwrap();
        assert_eq!(list.to_string(), "[2]");
        assert_eq!(subscript(&list, &int(5)).unwrap_err().kind, ExceptionKind::IndexError);

        let dict = Value::dict(vec![]);
        store_subscript(&dict, &Value::str("k"), int(1)).unwrap();
        assert!(subscript(&dict, &Value::str("k")).unwrap().equals(&int(1)));
        assert_eq!(subscript(&dict, &Value::str("z")).unwrap_err().kind, ExceptionKind::KeyError);
    }

    #[test]
    fn test_contains() {
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::tuple(vec![int(1)]), &Value::Float(1.0)).unwrap());
        assert!(contains(&int(1), &int(1)).is_err());
    }

    #[test]
    fn test_repetition() {
        let mul = |a: &Value, b: &Value| binary_op(BinaryOperator::Multiply, a, b);
        assert!(mul(&Value::str("ab"), &int(3)).unwrap().equals(&Value::str("ababab")));
        assert!(mul(&int(-2), &Value::str("ab")).unwrap().equals(&Value::str("")));
        let list = Value::list(vec![int(1), int(2)]);
        assert_eq!(mul(&list, &int(2)).unwrap().to_string(), "[1, 2, 1, 2]");
        assert_eq!(mul(&Value::tuple(vec![]), &int(i64::MAX)).unwrap().to_string(), "()");
    }

    #[test]
    fn test_oversized_repetition_is_overflow() {
        let mul = |a: &Value, b: &Value| binary_op(BinaryOperator::Multiply, a, b);
        let huge = int(i64::MAX / 2);
        let err = mul(&Value::str("ab"), &huge).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OverflowError);

        let list = Value::list(vec![int(1), int(2)]);
        assert_eq!(mul(&huge, &list).unwrap_err().kind, ExceptionKind::OverflowError);
        let just_over = int((MAX_REPEAT_LEN / 2 + 1) as i64);
        assert_eq!(mul(&list, &just_over).unwrap_err().kind, ExceptionKind::OverflowError);
    }
}

//! Builtin functions available to every namespace

use super::error::RuntimeError;
use super::interpreter::arithmetic::compare_values;
use super::value::{Builtin, Value, ValueIter};
use kestrel_bytecode::CompareOperator;

/// Every builtin, by name
pub fn all() -> Vec<Builtin> {
    vec![
        Builtin { name: "len", func: builtin_len },
        Builtin { name: "abs", func: builtin_abs },
        Builtin { name: "range", func: builtin_range },
        Builtin { name: "min", func: builtin_min },
        Builtin { name: "max", func: builtin_max },
        Builtin { name: "int", func: builtin_int },
        Builtin { name: "float", func: builtin_float },
        Builtin { name: "str", func: builtin_str },
    ]
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(RuntimeError::type_error(format!(
            "{}() takes {} arguments ({} given)",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn builtin_len(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("len", args, 1, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.lock().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(pairs) => pairs.lock().len(),
        other => {
            return Err(RuntimeError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

fn builtin_abs(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("abs", args, 1, 1)?;
    match &args[0] {
        Value::Float(x) => Ok(Value::Float(x.abs())),
        other => match other.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::overflow("integer overflow in abs()")),
            None => Err(RuntimeError::type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }
}

fn int_arg(name: &str, value: &Value) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{}() expects integer arguments, got '{}'",
            name,
            value.type_name()
        ))
    })
}

fn builtin_range(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("range", args, 1, 3)?;
    let ints = args
        .iter()
        .map(|arg| int_arg("range", arg))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(RuntimeError::type_error("range() takes 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::iterator(ValueIter::Range {
        next: start,
        stop,
        step,
    }))
}

/// Items of an iterable argument
fn iterable_items(name: &str, value: &Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::List(items) => Ok(items.lock().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        Value::Iterator(iter) => {
            let mut iter = iter.lock();
            Ok(std::iter::from_fn(|| iter.advance()).collect())
        }
        other => Err(RuntimeError::type_error(format!(
            "'{}' object is not iterable for {}()",
            other.type_name(),
            name
        ))),
    }
}

fn extreme(name: &str, args: &[Value], want: CompareOperator) -> Result<Value, RuntimeError> {
    let items = match args {
        [] => return Err(RuntimeError::type_error(format!("{}() expected at least 1 argument", name))),
        [single] => iterable_items(name, single)?,
        many => many.to_vec(),
    };
    let mut items = items.into_iter();
    let mut best = items
        .next()
        .ok_or_else(|| RuntimeError::value_error(format!("{}() arg is an empty sequence", name)))?;
    for item in items {
        if compare_values(want, &item, &best)? {
            best = item;
        }
    }
    Ok(best)
}

fn builtin_min(args: &[Value]) -> Result<Value, RuntimeError> {
    extreme("min", args, CompareOperator::Lt)
}

fn builtin_max(args: &[Value]) -> Result<Value, RuntimeError> {
    extreme("max", args, CompareOperator::Gt)
}

fn builtin_int(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("int", args, 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Int(0));
    };
    match value {
        Value::Float(x) => {
            if !x.is_finite() || x.trunc() < i64::MIN as f64 || x.trunc() >= i64::MAX as f64 {
                return Err(RuntimeError::overflow("cannot convert float to integer"));
            }
            Ok(Value::Int(x.trunc() as i64))
        }
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            RuntimeError::value_error(format!("invalid literal for int(): {:?}", s))
        }),
        other => int_arg("int", other).map(Value::Int),
    }
}

fn builtin_float(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("float", args, 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            RuntimeError::value_error(format!("could not convert string to float: {:?}", s))
        }),
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            RuntimeError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn builtin_str(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args("str", args, 0, 1)?;
    Ok(match args.first() {
        Some(value) => Value::str(&value.to_string()),
        None => Value::str(""),
    })
}

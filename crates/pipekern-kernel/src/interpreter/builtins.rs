//! Built-in functions of the Kern language.

use std::cmp::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use crate::ast::Value;
use crate::evaluator::{EvalError, EvalResult};
use crate::signal::Interrupt;

use super::ops;

/// Names resolvable as builtins when no context binding shadows them.
pub const BUILTINS: &[&str] = &[
    "abs", "bool", "float", "int", "keys", "len", "max", "min", "range", "round", "sleep", "str",
    "sum", "type", "values",
];

/// Polling interval for interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Call a builtin by name.
pub fn call(name: &str, args: Vec<Value>, interrupt: &Interrupt) -> EvalResult<Value> {
    match name {
        "abs" => abs(one(name, args)?),
        "bool" => Ok(Value::Bool(one(name, args)?.is_truthy())),
        "float" => to_float(one(name, args)?),
        "int" => to_int(one(name, args)?),
        "keys" => keys(one(name, args)?),
        "len" => len(&one(name, args)?),
        "max" => extreme(name, args, Ordering::Greater),
        "min" => extreme(name, args, Ordering::Less),
        "range" => range(args, interrupt),
        "round" => round(args),
        "sleep" => sleep(one(name, args)?, interrupt),
        "str" => Ok(Value::String(one(name, args)?.to_string())),
        "sum" => sum(one(name, args)?),
        "type" => Ok(Value::String(one(name, args)?.type_name().to_string())),
        "values" => values(one(name, args)?),
        other => Err(EvalError::UndefinedVariable(other.to_string())),
    }
}

fn one(name: &str, args: Vec<Value>) -> EvalResult<Value> {
    let count = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(EvalError::Argument(format!(
            "{name}() takes exactly one argument ({count} given)"
        ))),
    }
}

fn abs(value: Value) -> EvalResult<Value> {
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| EvalError::Arithmetic("integer overflow in abs".into())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::UInt(u) => Ok(Value::UInt(u)),
        other => Err(EvalError::Type(format!("abs() of {}", other.type_name()))),
    }
}

fn to_float(value: Value) -> EvalResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::UInt(u) => Ok(Value::Float(u as f64)),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| EvalError::Argument(format!("could not convert {s:?} to float"))),
        other => Err(EvalError::Type(format!("float() of {}", other.type_name()))),
    }
}

fn to_int(value: Value) -> EvalResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::UInt(u) => Ok(Value::UInt(u)),
        Value::Float(f) if f.is_finite() && f.abs() < 9.2e18 => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => Err(EvalError::Argument(format!("cannot convert {f} to int"))),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| EvalError::Argument(format!("invalid literal for int(): {s:?}"))),
        other => Err(EvalError::Type(format!("int() of {}", other.type_name()))),
    }
}

fn keys(value: Value) -> EvalResult<Value> {
    match value {
        Value::Object(map) => Ok(Value::Array(map.into_keys().map(Value::String).collect())),
        other => Err(EvalError::Type(format!("keys() of {}", other.type_name()))),
    }
}

fn values(value: Value) -> EvalResult<Value> {
    match value {
        Value::Object(map) => Ok(Value::Array(map.into_values().collect())),
        other => Err(EvalError::Type(format!("values() of {}", other.type_name()))),
    }
}

fn len(value: &Value) -> EvalResult<Value> {
    let n = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(EvalError::Type(format!("{} has no len()", other.type_name()))),
    };
    Ok(Value::Int(n as i64))
}

/// `min`/`max` over either one array argument or several arguments.
fn extreme(name: &str, args: Vec<Value>, want: Ordering) -> EvalResult<Value> {
    let items = match <[Value; 1]>::try_from(args) {
        Ok([Value::Array(items)]) => items,
        Ok([single]) => vec![single],
        Err(args) => args,
    };

    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| EvalError::Argument(format!("{name}() of an empty sequence")))?;
    for item in iter {
        match ops::order(&item, &best) {
            Some(ordering) if ordering == want => best = item,
            Some(_) => {}
            None => {
                return Err(EvalError::Type(format!(
                    "cannot compare {} and {}",
                    item.type_name(),
                    best.type_name()
                )))
            }
        }
    }
    Ok(best)
}

fn sum(value: Value) -> EvalResult<Value> {
    let Value::Array(items) = value else {
        return Err(EvalError::Type(format!("sum() of {}", value.type_name())));
    };
    items.into_iter().try_fold(Value::Int(0), |total, item| {
        if item.as_f64().is_none() {
            return Err(EvalError::Type(format!("sum() of non-number {}", item.type_name())));
        }
        ops::binary_op(crate::ast::BinaryOp::Add, total, item)
    })
}

fn int_arg(value: &Value, what: &str) -> EvalResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::Type(format!("{what} must be int, not {}", other.type_name()))),
    }
}

/// `range(stop)`, `range(start, stop)`, `range(start, stop, step)`.
fn range(args: Vec<Value>, interrupt: &Interrupt) -> EvalResult<Value> {
    let (start, stop, step) = match args.as_slice() {
        [stop] => (0, int_arg(stop, "stop")?, 1),
        [start, stop] => (int_arg(start, "start")?, int_arg(stop, "stop")?, 1),
        [start, stop, step] => (
            int_arg(start, "start")?,
            int_arg(stop, "stop")?,
            int_arg(step, "step")?,
        ),
        _ => {
            return Err(EvalError::Argument(format!(
                "range() takes 1 to 3 arguments ({} given)",
                args.len()
            )))
        }
    };
    if step == 0 {
        return Err(EvalError::Argument("range() step must not be zero".into()));
    }

    let span = i128::from(stop) - i128::from(start);
    let step_wide = i128::from(step);
    let count = if span.signum() == step_wide.signum() {
        (span.abs() + step_wide.abs() - 1) / step_wide.abs()
    } else {
        0
    };
    let count = usize::try_from(count)
        .ok()
        .filter(|count| *count <= ops::MAX_SEQUENCE_LEN)
        .ok_or_else(|| {
            EvalError::Argument(format!(
                "range() of {count} items is too large (limit {})",
                ops::MAX_SEQUENCE_LEN
            ))
        })?;

    let mut out = Vec::with_capacity(count);
    let mut current = i128::from(start);
    for i in 0..count {
        if i % RANGE_CHECK_EVERY == 0 {
            interrupt.check()?;
        }
        // Every item lies between start and stop, so it fits in an i64.
        out.push(Value::Int(current as i64));
        current += step_wide;
    }
    Ok(Value::Array(out))
}

/// How many `range()` items are built between interrupt checks.
const RANGE_CHECK_EVERY: usize = 4096;

/// `round(x)` → int, `round(x, digits)` → float.
fn round(args: Vec<Value>) -> EvalResult<Value> {
    match args.as_slice() {
        [Value::Int(i)] => Ok(Value::Int(*i)),
        [Value::UInt(u)] => Ok(Value::UInt(*u)),
        [Value::Float(f)] => to_int(Value::Float(f.round())),
        [value, digits] => {
            let x = value.as_f64().ok_or_else(|| {
                EvalError::Type(format!("round() of {}", value.type_name()))
            })?;
            let digits = int_arg(digits, "digits")?;
            let digits = i32::try_from(digits)
                .map_err(|_| EvalError::Argument("round() digits out of range".into()))?;
            let scale = 10f64.powi(digits);
            Ok(Value::Float((x * scale).round() / scale))
        }
        [other] => Err(EvalError::Type(format!("round() of {}", other.type_name()))),
        _ => Err(EvalError::Argument(format!(
            "round() takes 1 or 2 arguments ({} given)",
            args.len()
        ))),
    }
}

/// Sleep in short slices so an interrupt ends it promptly.
fn sleep(seconds: Value, interrupt: &Interrupt) -> EvalResult<Value> {
    let seconds = seconds
        .as_f64()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| EvalError::Argument("sleep() needs a non-negative number of seconds".into()))?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    loop {
        interrupt.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(Value::Null);
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

//! Operator semantics for Kern values.

use std::cmp::Ordering;

use crate::ast::{BinaryOp, UnaryOp, Value};
use crate::evaluator::{EvalError, EvalResult};

fn type_error(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::Type(format!(
        "unsupported operand types for {}: {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow(what: &str) -> EvalError {
    EvalError::Arithmetic(format!("integer overflow in {what}"))
}

/// Apply a unary operator.
pub fn unary_op(op: UnaryOp, operand: Value) -> EvalResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(|| overflow("negation")),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::UInt(u)) => Ok(Value::Float(-(u as f64))),
        (UnaryOp::Neg, other) => Err(EvalError::Type(format!(
            "bad operand type for unary -: {}",
            other.type_name()
        ))),
    }
}

/// Apply a non-short-circuit binary operator.
pub fn binary_op(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => numeric(op, &left, &right, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => mul(left, right),
        BinaryOp::Div => div(&left, &right),
        BinaryOp::FloorDiv => floor_div(&left, &right),
        BinaryOp::Rem => rem(&left, &right),
        BinaryOp::Pow => pow(&left, &right),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt => compare(op, &left, &right, Ordering::is_lt),
        BinaryOp::LtEq => compare(op, &left, &right, Ordering::is_le),
        BinaryOp::Gt => compare(op, &left, &right, Ordering::is_gt),
        BinaryOp::GtEq => compare(op, &left, &right, Ordering::is_ge),
        // Short-circuit operators are handled by the evaluator.
        BinaryOp::And | BinaryOp::Or => Err(EvalError::Type(format!(
            "{} cannot be applied eagerly",
            op.symbol()
        ))),
    }
}

fn numeric(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b).map(Value::Int).ok_or_else(|| {
            overflow(match op {
                BinaryOp::Add => "addition",
                BinaryOp::Sub => "subtraction",
                _ => "multiplication",
            })
        }),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
            _ => Err(type_error(op, left, right)),
        },
    }
}

fn add(left: Value, right: Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::String(mut a), Value::String(b)) => {
            bounded_len(a.len().checked_add(b.len()))?;
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::Array(mut a), Value::Array(b)) => {
            bounded_len(a.len().checked_add(b.len()))?;
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Ok(Value::Object(a))
        }
        (left, right) => numeric(BinaryOp::Add, &left, &right, i64::checked_add, |a, b| a + b),
    }
}

/// Largest string (in bytes) or array (in elements) an operator may build.
pub(super) const MAX_SEQUENCE_LEN: usize = 1 << 24;

/// Accept a computed result length if it did not overflow and stays
/// within [`MAX_SEQUENCE_LEN`].
pub(super) fn bounded_len(total: Option<usize>) -> EvalResult<usize> {
    total
        .filter(|total| *total <= MAX_SEQUENCE_LEN)
        .ok_or_else(|| {
            EvalError::Arithmetic(format!("result too large (limit {MAX_SEQUENCE_LEN})"))
        })
}

fn repeated_len(len: usize, n: i64) -> EvalResult<usize> {
    bounded_len(len.checked_mul(usize::try_from(n).unwrap_or(0)))
}

fn mul(left: Value, right: Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            repeated_len(s.len(), n)?;
            Ok(Value::String(s.repeat(usize::try_from(n).unwrap_or(0))))
        }
        (Value::Array(items), Value::Int(n)) | (Value::Int(n), Value::Array(items)) => {
            let total = repeated_len(items.len(), n)?;
            Ok(Value::Array(items.iter().cycle().take(total).cloned().collect()))
        }
        (left, right) => numeric(BinaryOp::Mul, &left, &right, i64::checked_mul, |a, b| a * b),
    }
}

fn div(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left.as_f64(), right.as_f64()) {
        (Some(_), Some(b)) if b == 0.0 => Err(EvalError::Arithmetic("division by zero".into())),
        (Some(a), Some(b)) => Ok(Value::Float(a / b)),
        _ => Err(type_error(BinaryOp::Div, left, right)),
    }
}

fn floor_div(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(EvalError::Arithmetic("division by zero".into())),
        (Value::Int(a), Value::Int(b)) => {
            let q = a.checked_div(*b).ok_or_else(|| overflow("division"))?;
            // Round toward negative infinity when the signs differ.
            if a % b != 0 && ((*a < 0) != (*b < 0)) {
                Ok(Value::Int(q - 1))
            } else {
                Ok(Value::Int(q))
            }
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(_), Some(b)) if b == 0.0 => Err(EvalError::Arithmetic("division by zero".into())),
            (Some(a), Some(b)) => Ok(Value::Float((a / b).floor())),
            _ => Err(type_error(BinaryOp::FloorDiv, left, right)),
        },
    }
}

fn rem(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(EvalError::Arithmetic("modulo by zero".into())),
        (Value::Int(a), Value::Int(b)) => a.checked_rem(*b).map(Value::Int).ok_or_else(|| overflow("modulo")),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(_), Some(b)) if b == 0.0 => Err(EvalError::Arithmetic("modulo by zero".into())),
            (Some(a), Some(b)) => Ok(Value::Float(a % b)),
            _ => Err(type_error(BinaryOp::Rem, left, right)),
        },
    }
}

fn pow(left: &Value, right: &Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int(base), Value::Int(exp)) if *exp >= 0 => {
            let exp = u32::try_from(*exp).map_err(|_| overflow("exponentiation"))?;
            base.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow("exponentiation"))
        }
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
            _ => Err(type_error(BinaryOp::Pow, left, right)),
        },
    }
}

/// Ordering between two values, if they are comparable.
pub fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
        // A UInt is always above every Int.
        (Value::Int(_), Value::UInt(_)) => Some(Ordering::Less),
        (Value::UInt(_), Value::Int(_)) => Some(Ordering::Greater),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

fn compare(
    op: BinaryOp,
    left: &Value,
    right: &Value,
    test: fn(Ordering) -> bool,
) -> EvalResult<Value> {
    let comparable = matches!(
        (left, right),
        (Value::String(_), Value::String(_))
    ) || (left.as_f64().is_some() && right.as_f64().is_some());

    if !comparable {
        return Err(type_error(op, left, right));
    }
    // NaN is unordered: every comparison is false.
    Ok(Value::Bool(order(left, right).is_some_and(test)))
}

/// Deep structural equality; ints and floats compare by numeric value.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        (Value::UInt(a), Value::Float(b)) | (Value::Float(b), Value::UInt(a)) => (*a as f64) == *b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => left == right,
    }
}

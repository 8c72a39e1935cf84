//! Tree-walking evaluation of Kern statements and expressions.
//!
//! Variable references resolve through the [`Context`] first and then fall
//! back to builtin names, so a binding called `len` shadows the builtin.

use crate::ast::{BinaryOp, Expr, Program, Stmt, Value};
use crate::context::Context;
use crate::evaluator::{EvalError, EvalResult};
use crate::signal::Interrupt;

use super::{builtins, ops};

/// Evaluation state for one call into the interpreter.
pub(super) struct Eval<'a> {
    context: &'a mut Context,
    interrupt: &'a Interrupt,
}

impl<'a> Eval<'a> {
    pub(super) fn new(context: &'a mut Context, interrupt: &'a Interrupt) -> Self {
        Self { context, interrupt }
    }

    /// Run every statement in order. The result is the value of the final
    /// statement when it is an expression.
    pub(super) fn run(&mut self, program: &Program) -> EvalResult<Option<Value>> {
        let mut last = None;
        for stmt in &program.statements {
            self.interrupt.check()?;
            tracing::trace!(kind = stmt.kind_name(), "statement");
            last = self.stmt(stmt)?;
        }
        Ok(last)
    }

    fn stmt(&mut self, stmt: &Stmt) -> EvalResult<Option<Value>> {
        match stmt {
            Stmt::Assign { name, value } => {
                let value = self.expr(value)?;
                self.context.set(name.clone(), value);
                Ok(None)
            }
            Stmt::Delete(name) => {
                self.context.remove(name);
                Ok(None)
            }
            Stmt::Expr(expr) => self.expr(expr).map(Some),
        }
    }

    pub(super) fn expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.expr(item))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::Array),
            Expr::Object(entries) => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let value = self.expr(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                ops::unary_op(*op, operand)
            }
            Expr::Binary { left, op, right } => self.binary(left, *op, right),
            Expr::Index { target, index } => {
                let target = self.expr(target)?;
                let index = self.expr(index)?;
                index_value(target, &index)
            }
            Expr::Member { target, name } => match self.expr(target)? {
                Value::Object(mut map) => map
                    .remove(name)
                    .ok_or_else(|| EvalError::Key(name.clone())),
                other => Err(EvalError::Type(format!(
                    "{} has no member {name}",
                    other.type_name()
                ))),
            },
            Expr::Call { callee, args } => {
                let callee = self.expr(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.expr(arg))
                    .collect::<EvalResult<Vec<_>>>()?;
                self.interrupt.check()?;
                match callee {
                    Value::Builtin(name) => builtins::call(&name, args, self.interrupt),
                    other => Err(EvalError::Type(format!(
                        "{} is not callable",
                        other.type_name()
                    ))),
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        if let Some(value) = self.context.get(name) {
            return Ok(value.clone());
        }
        if builtins::is_builtin(name) {
            return Ok(Value::Builtin(name.to_string()));
        }
        Err(EvalError::UndefinedVariable(name.to_string()))
    }

    fn binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> EvalResult<Value> {
        let left = self.expr(left)?;
        match op {
            // Short circuit: the deciding operand is the result.
            BinaryOp::And if !left.is_truthy() => Ok(left),
            BinaryOp::Or if left.is_truthy() => Ok(left),
            BinaryOp::And | BinaryOp::Or => self.expr(right),
            _ => {
                let right = self.expr(right)?;
                ops::binary_op(op, left, right)
            }
        }
    }
}

/// Resolve a possibly negative index against a length.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn index_value(target: Value, index: &Value) -> EvalResult<Value> {
    match (target, index) {
        (Value::Array(mut items), Value::Int(i)) => {
            let len = items.len();
            resolve_index(*i, len)
                .map(|at| items.swap_remove(at))
                .ok_or_else(|| EvalError::Index(format!("{i} (length {len})")))
        }
        (Value::String(s), Value::Int(i)) => {
            let len = s.chars().count();
            resolve_index(*i, len)
                .and_then(|at| s.chars().nth(at))
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| EvalError::Index(format!("{i} (length {len})")))
        }
        (Value::Array(items), Value::UInt(u)) => {
            Err(EvalError::Index(format!("{u} (length {})", items.len())))
        }
        (Value::Object(mut map), Value::String(key)) => map
            .remove(key)
            .ok_or_else(|| EvalError::Key(key.clone())),
        (target, index) => Err(EvalError::Type(format!(
            "cannot index {} with {}",
            target.type_name(),
            index.type_name()
        ))),
    }
}

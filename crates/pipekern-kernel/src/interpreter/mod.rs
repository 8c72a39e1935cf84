//! The bundled evaluation capability: an interpreter for Kern.
//!
//! Kern is a small dynamically typed expression language whose values are
//! exactly the kernel's [`Value`]s. A code fragment is a `;`-separated list
//! of statements:
//!
//! ```text
//! total = sum(range(5)); names = ['a', 'b']; del scratch; total * 2
//! ```
//!
//! # Example
//!
//! ```
//! use pipekern_kernel::{Context, Evaluator, Interpreter, Interrupt, Value};
//!
//! let mut interp = Interpreter::new(Interrupt::new());
//! let mut ctx = Context::new();
//! interp.execute("x = 5", &mut ctx).unwrap();
//! assert_eq!(interp.evaluate("x + 1", &mut ctx).unwrap(), Value::Int(6));
//! ```

mod builtins;
mod eval;
mod ops;

pub use builtins::BUILTINS;

use crate::ast::Value;
use crate::context::Context;
use crate::evaluator::{EvalResult, Evaluator};
use crate::parser::{parse, parse_expression};
use crate::signal::Interrupt;

use eval::Eval;

/// Language tag reported in variable descriptors.
pub const LANGUAGE: &str = "Kern";

/// Kern interpreter.
///
/// Holds no bindings of its own; all state lives in the [`Context`] passed
/// to each call.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    interrupt: Interrupt,
}

impl Interpreter {
    /// Create an interpreter that abandons work when `interrupt` is raised.
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

impl Evaluator for Interpreter {
    fn language(&self) -> &str {
        LANGUAGE
    }

    fn execute(&mut self, code: &str, context: &mut Context) -> EvalResult<Option<Value>> {
        let program = parse(code)?;
        Eval::new(context, &self.interrupt).run(&program)
    }

    fn evaluate(&mut self, expr: &str, context: &mut Context) -> EvalResult<Value> {
        let expr = parse_expression(expr)?;
        self.interrupt.check()?;
        Eval::new(context, &self.interrupt).expr(&expr)
    }
}

//! The evaluation capability the kernel delegates code to.
//!
//! The kernel never interprets code itself. It hands each fragment or
//! expression to an [`Evaluator`] together with the shared [`Context`], and
//! serializes whatever value comes back.

use thiserror::Error;

use crate::ast::Value;
use crate::context::Context;
use crate::parser::ParseError;

/// Errors raised while running a fragment or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("index out of range: {0}")]
    Index(String),

    #[error("key not found: {0}")]
    Key(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("bad argument: {0}")]
    Argument(String),

    /// SIGINT arrived while the task was running.
    #[error("interrupted")]
    Interrupted,
}

impl EvalError {
    /// Stable name reported as `errorType` in error records.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EvalError::Syntax(_) => "SyntaxError",
            EvalError::UndefinedVariable(_) => "NameError",
            EvalError::Type(_) => "TypeError",
            EvalError::Index(_) => "IndexError",
            EvalError::Key(_) => "KeyError",
            EvalError::Arithmetic(_) => "ArithmeticError",
            EvalError::Argument(_) => "ArgumentError",
            EvalError::Interrupted => "Interrupted",
        }
    }
}

impl From<ParseError> for EvalError {
    fn from(err: ParseError) -> Self {
        EvalError::Syntax(err.to_string())
    }
}

/// Result type for evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// A language runtime the kernel can drive.
///
/// Implementations read and write bindings through the provided context;
/// the kernel guarantees exclusive access for the duration of each call.
pub trait Evaluator {
    /// Language tag reported in variable descriptors.
    fn language(&self) -> &str;

    /// Run one code fragment, returning its result value if it has one.
    fn execute(&mut self, code: &str, context: &mut Context) -> EvalResult<Option<Value>>;

    /// Evaluate a single expression.
    fn evaluate(&mut self, expr: &str, context: &mut Context) -> EvalResult<Value>;
}

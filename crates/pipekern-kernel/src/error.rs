//! Task-level errors and the error record written to the error channel.

use serde::Serialize;
use thiserror::Error;

use crate::evaluator::EvalError;

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Anything that can make a single task fail.
///
/// None of these end the kernel: the dispatcher reports them as an
/// [`ErrorRecord`] and moves on to the next task.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The first field matched no task-kind sentinel.
    #[error("unrecognized task: {0:?}")]
    UnrecognizedTask(String),

    /// A recognized task was missing a required field.
    #[error("{task} task is missing field {position}")]
    MissingField { task: &'static str, position: usize },

    /// The evaluator raised an error.
    #[error(transparent)]
    Execution(#[from] EvalError),

    /// A JSON value or context could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The process could not be forked.
    #[error("fork failed: {0}")]
    Fork(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KernelError {
    /// Name reported as `errorType` in the error record.
    pub fn error_type(&self) -> &'static str {
        match self {
            KernelError::UnrecognizedTask(_) => "UnrecognizedTask",
            KernelError::MissingField { .. } => "MissingField",
            KernelError::Execution(err) => err.kind_name(),
            KernelError::Decode(_) => "DecodeError",
            KernelError::Fork(_) => "ForkError",
            KernelError::Io(_) => "IoError",
        }
    }

    /// Interrupts are swallowed rather than reported.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, KernelError::Execution(EvalError::Interrupted))
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: "ExecutionError",
            error_type: self.error_type().to_string(),
            error_message: self.to_string(),
        }
    }
}

impl From<nix::Error> for KernelError {
    fn from(err: nix::Error) -> Self {
        KernelError::Fork(err.desc().to_string())
    }
}

/// The structured record a failed task writes to the error channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error_type: String,
    pub error_message: String,
}

impl ErrorRecord {
    /// One line of compact JSON.
    pub fn to_json(&self) -> String {
        // A struct of plain strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

//! pipekern-kernel: a line-protocol execution kernel.
//!
//! This crate provides:
//!
//! - **Protocol**: sentinel vocabularies and task framing
//! - **Context**: the persistent variable store
//! - **Kernel**: dispatch, readiness signalling and the serve loop
//! - **Fork**: session forking onto a new set of pipes
//! - **Signal**: SIGINT handling that abandons the running task only
//! - **Interpreter**: the bundled Kern language (lexer, parser, evaluator)

pub mod ast;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod fork;
pub mod interpreter;
pub mod kernel;
pub mod lexer;
pub mod parser;
pub mod protocol;
pub mod signal;

pub use ast::Value;
pub use context::Context;
pub use error::{ErrorRecord, KernelError, KernelResult};
pub use evaluator::{EvalError, EvalResult, Evaluator};
pub use fork::{redirect_stdio, ForkOutcome, Forker, ProcessForker};
pub use interpreter::Interpreter;
pub use kernel::{serve_stdio, Channels, Dispatched, Kernel, KernelConfig, Served, StdChannels};
pub use protocol::{PipeSet, Sentinels, Task};
pub use signal::{install_interrupt_handler, Interrupt};

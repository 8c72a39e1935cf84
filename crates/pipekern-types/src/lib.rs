//! Pure data types for pipekern: runtime values and variable descriptors.
//!
//! This crate is a leaf dependency with no I/O and no interpreter. It exists
//! so that hosts talking to a kernel can decode its responses without pulling
//! in the kernel itself.

pub mod value;
pub mod variable;

pub use value::*;
pub use variable::*;

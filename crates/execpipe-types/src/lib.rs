//! Pure data types for execpipe: stage outcomes and run results.
//!
//! This crate is a leaf dependency with no I/O and no process handling.
//! It exists so that consumers reporting on pipeline runs (log shippers,
//! JSON reporters) can work with results without pulling in the kernel.

pub mod result;
pub mod status;

pub use result::*;
pub use status::*;

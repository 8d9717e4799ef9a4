//! execpipe-kernel: run chains of external programs and in-process functions.
//!
//! This crate provides:
//!
//! - **Buffer**: `RingBuffer`, the growable ring that backs every link
//! - **Stages**: external programs (`ExecStage`) and callback stages
//!   (`PipeSource`, `PipeFunction`, `PipeSink`)
//! - **Process**: spawning, PATH resolution and reaping of children
//! - **Driver**: the single-threaded `poll(2)` loop that moves bytes
//! - **Pipeline**: `ExecPipe`, the builder and run facade
//! - **Config**: `PipeConfig`, loaded from the user's config directory
//!
//! Stage failures are data (see [`RunResult`]); only engine failures are
//! errors (see [`PipeError`]).

pub mod adapters;
pub mod buffer;
pub mod config;
pub mod debug;
pub mod driver;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod stage;

pub use adapters::{BytesSink, FileSink, PipeFunction, PipeSink, PipeSource, StageWriter, StringSink};
pub use buffer::{DEFAULT_CAPACITY, RingBuffer};
pub use config::{ConfigError, PipeConfig};
pub use debug::{DebugLevel, DebugLog};
pub use driver::LinkState;
pub use error::{PipeError, PipeResult};
pub use pipeline::ExecPipe;
pub use process::{resolve_in_path, signal_name};
pub use stage::{ExecStage, Input, Output, Stage, StageSet};

// Result types live in the leaf crate; re-export for embedders.
pub use execpipe_types::{
    LinkError, RunResult, SPAWN_FAILURE_CODE, StageResult, StageStatus,
};

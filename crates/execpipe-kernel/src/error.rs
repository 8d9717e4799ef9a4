//! Engine-level errors.
//!
//! Only failures that leave the engine unable to guarantee a correct run end
//! up here. Missing programs, crashed children and broken pipes are recorded
//! in the [`RunResult`](execpipe_types::RunResult) instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline runs.
pub type PipeResult<T> = Result<T, PipeError>;

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("pipeline has already run")]
    AlreadyRun,

    #[error("cannot open input file {}: {source}", path.display())]
    OpenInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create output file {}: {source}", path.display())]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot configure pipe for stage {stage}: {source}")]
    Descriptor {
        stage: usize,
        #[source]
        source: nix::Error,
    },

    #[error("poll failed: {0}")]
    Poll(#[source] nix::Error),

    #[error("failed to wait for stage {stage}: {source}")]
    Wait {
        stage: usize,
        #[source]
        source: io::Error,
    },

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

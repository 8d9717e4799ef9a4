//! RunResult, the aggregated outcome of one pipeline run.

use serde::{Deserialize, Serialize};

use crate::status::StageStatus;

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Program name as given for external stages, `None` for functions.
    pub program: Option<String>,
    /// How the stage finished.
    pub status: StageStatus,
}

impl StageResult {
    /// Result slot for an external program that has not run yet.
    pub fn external(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            status: StageStatus::Pending,
        }
    }

    /// Result slot for an in-process function stage.
    pub fn in_process() -> Self {
        Self {
            program: None,
            status: StageStatus::InProcess,
        }
    }

    /// True if this stage runs an external program.
    pub fn is_external(&self) -> bool {
        self.program.is_some()
    }
}

/// An I/O error that closed one link early.
///
/// Link `k` connects node `k` to node `k + 1`, where node 0 is the
/// pipeline input and node `n + 1` the output of an `n`-stage pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkError {
    pub link: usize,
    pub message: String,
}

/// The result of running a pipeline.
///
/// Stage-local failures (missing programs, crashes, broken pipes) are plain
/// data here; only engine failures surface as errors from `run()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// One entry per stage, in pipeline order.
    pub stages: Vec<StageResult>,
    /// Links closed early by an I/O error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_errors: Vec<LinkError>,
}

impl RunResult {
    /// True if every external stage exited with code 0.
    pub fn all_return_codes_zero(&self) -> bool {
        self.stages
            .iter()
            .filter(|s| s.is_external())
            .all(|s| s.status.success())
    }

    /// Exit code of stage `index`, if it exited normally.
    pub fn return_code(&self, index: usize) -> Option<i32> {
        self.stages.get(index).and_then(|s| s.status.code())
    }

    /// Terminating signal of stage `index`, if it was killed.
    pub fn return_signal(&self, index: usize) -> Option<i32> {
        self.stages.get(index).and_then(|s| s.status.signal())
    }

    /// Status of stage `index`.
    pub fn status(&self, index: usize) -> Option<StageStatus> {
        self.stages.get(index).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(program: &str, status: StageStatus) -> StageResult {
        StageResult {
            program: Some(program.to_string()),
            status,
        }
    }

    #[test]
    fn all_zero_ignores_in_process_stages() {
        let result = RunResult {
            stages: vec![
                finished("cat", StageStatus::Exited { code: 0 }),
                StageResult::in_process(),
                finished("gzip", StageStatus::Exited { code: 0 }),
            ],
            link_errors: vec![],
        };
        assert!(result.all_return_codes_zero());
    }

    #[test]
    fn all_zero_fails_on_signal() {
        let result = RunResult {
            stages: vec![finished("crash", StageStatus::Signaled { signal: 11 })],
            link_errors: vec![],
        };
        assert!(!result.all_return_codes_zero());
        assert_eq!(result.return_code(0), None);
        assert_eq!(result.return_signal(0), Some(11));
    }

    #[test]
    fn pending_stage_is_not_zero() {
        let result = RunResult {
            stages: vec![StageResult::external("cat")],
            link_errors: vec![],
        };
        assert!(!result.all_return_codes_zero());
    }

    #[test]
    fn out_of_range_index() {
        let result = RunResult::default();
        assert_eq!(result.return_code(4), None);
        assert_eq!(result.return_signal(4), None);
        assert_eq!(result.status(4), None);
        // No external stages at all is vacuously successful.
        assert!(result.all_return_codes_zero());
    }
}

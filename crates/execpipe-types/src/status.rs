//! Per-stage outcome of a pipeline run.

use serde::{Deserialize, Serialize};

/// Exit code recorded for a stage whose program could not be started.
pub const SPAWN_FAILURE_CODE: i32 = 255;

/// How a pipeline stage finished.
///
/// A stage killed by a signal never carries an exit code and vice versa, so
/// callers inspecting results cannot confuse the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage has not finished (or the pipeline has not run yet).
    Pending,
    /// The process exited normally with this code.
    Exited { code: i32 },
    /// The process was terminated by this signal number.
    Signaled { signal: i32 },
    /// The stage is an in-process function; it has no exit status.
    InProcess,
}

impl StageStatus {
    /// Exit code, if the stage exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            StageStatus::Exited { code } => Some(*code),
            _ => None,
        }
    }

    /// Terminating signal, if the stage was killed.
    pub fn signal(&self) -> Option<i32> {
        match self {
            StageStatus::Signaled { signal } => Some(*signal),
            _ => None,
        }
    }

    /// True for an external stage that exited with code 0.
    pub fn success(&self) -> bool {
        matches!(self, StageStatus::Exited { code: 0 })
    }

    /// True once the stage has a final status.
    pub fn is_finished(&self) -> bool {
        !matches!(self, StageStatus::Pending)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Exited { code } => write!(f, "exit {}", code),
            StageStatus::Signaled { signal } => write!(f, "signal {}", signal),
            StageStatus::InProcess => write!(f, "in-process"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_and_signal_are_exclusive() {
        let exited = StageStatus::Exited { code: 3 };
        assert_eq!(exited.code(), Some(3));
        assert_eq!(exited.signal(), None);

        let killed = StageStatus::Signaled { signal: 11 };
        assert_eq!(killed.code(), None);
        assert_eq!(killed.signal(), Some(11));
        assert!(!killed.success());
    }

    #[test]
    fn in_process_is_finished_but_not_success() {
        assert!(StageStatus::InProcess.is_finished());
        assert!(!StageStatus::InProcess.success());
        assert!(!StageStatus::Pending.is_finished());
    }

    #[test]
    fn display() {
        assert_eq!(StageStatus::Exited { code: 0 }.to_string(), "exit 0");
        assert_eq!(StageStatus::Signaled { signal: 9 }.to_string(), "signal 9");
        assert_eq!(StageStatus::InProcess.to_string(), "in-process");
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_string(&StageStatus::Signaled { signal: 11 }).unwrap();
        assert_eq!(json, r#"{"kind":"signaled","signal":11}"#);
    }
}

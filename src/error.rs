//! Failure taxonomy for the split / annotate / merge pipeline.
//!
//! Only [`PipelineError::Infrastructure`] is retried by the scheduler; every
//! other variant fails the task on first occurrence.

use std::fmt;
use std::io;
use thiserror::Error;

/// One failed task, as reported at the end of a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task_id: String,
    pub reason: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task_id, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or non-unique input; raised before anything is scheduled.
    #[error("input error: {0}")]
    Input(String),

    /// The external annotate/mask step exited non-zero, timed out or
    /// produced output that could not be read.
    #[error("tool failure: {0}")]
    Tool(String),

    /// Lost worker or storage hiccup. Safe to retry.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    /// A record names a chunk the Lift Map has never heard of.
    #[error("consistency error: chunk '{0}' has no lift entry")]
    UnknownChunk(String),

    /// Task or chunk bookkeeping disagrees with itself.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("run failed: {}", format_failures(.failures))]
    RunFailed { failures: Vec<TaskFailure> },

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the scheduler may transparently re-run the task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Infrastructure(_))
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        PipelineError::Infrastructure(err.to_string())
    }
}

fn format_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infrastructure_is_retryable() {
        assert!(PipelineError::Infrastructure("disk".into()).is_retryable());
        assert!(!PipelineError::Tool("exit 1".into()).is_retryable());
        assert!(!PipelineError::Input("dup".into()).is_retryable());
        assert!(!PipelineError::UnknownChunk("chr1_00".into()).is_retryable());
        assert!(!PipelineError::Cancelled.is_retryable());
    }

    #[test]
    fn test_run_failed_lists_tasks() {
        let err = PipelineError::RunFailed {
            failures: vec![
                TaskFailure {
                    task_id: "annotate-00001".into(),
                    reason: "exit status 2".into(),
                },
                TaskFailure {
                    task_id: "annotate-00004".into(),
                    reason: "timed out".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "run failed: annotate-00001: exit status 2; annotate-00004: timed out"
        );
    }

    #[test]
    fn test_io_errors_are_infrastructure() {
        let err: PipelineError = io::Error::new(io::ErrorKind::Other, "gone").into();
        assert!(err.is_retryable());
    }
}

//! The outcome type produced by task execution.

use crate::error::Error;

/// Outcome of running a task's handler to completion.
///
/// `error` is `None` on success. This is the idiomatic rendering of spec
/// §6's "ok() := error.code == SUCCESS" rule — rather than an `Error`
/// variant meaning "no error", success is the absence of one.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Short human-readable summary of what happened.
    pub summary: String,
    /// Handler-defined output payload, opaque to the platform.
    pub output: String,
    /// Populated iff the task failed.
    pub error: Option<Error>,
}

impl TaskResult {
    /// Builds a successful result.
    pub fn ok(summary: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: output.into(),
            error: None,
        }
    }

    /// Builds a failed result carrying `error`.
    #[must_use]
    pub fn failed(error: Error) -> Self {
        Self {
            summary: error.to_string(),
            output: String::new(),
            error: Some(error),
        }
    }

    /// True iff this result represents success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

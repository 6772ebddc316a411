//! Stable, numeric-coded error taxonomy shared by every component.
//!
//! Every fallible operation in this crate returns [`Error`] rather than
//! panicking; there is no panic path through the core (spec §7). Mutex
//! poisoning is treated the same way — see [`crate::lock`] — so a bug in one
//! caller's handler can never turn into a poisoned-lock panic somewhere
//! else.

use thiserror::Error as ThisError;

/// Tagged error returned by every fallible operation in this crate.
///
/// Each variant corresponds to one of the stable numeric codes in spec §6;
/// see [`Error::code`].
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// No task with the given id is registered on the platform.
    #[error("task not found")]
    TaskNotFound,
    /// The task is not in a status from which the requested transition is legal.
    #[error("task status is invalid for this operation")]
    TaskStatusInvalid,
    /// A claim raced another claimer and lost; the task was already claimed.
    #[error("task has already been claimed")]
    TaskAlreadyClaimed,
    /// The task's category does not match any category the claimer declares.
    #[error("task category does not match claimer categories")]
    TaskCategoryMismatch,
    /// The task cannot be removed/modified in its current state (e.g. still claimed).
    #[error("task is not in a valid state for this operation")]
    TaskInvalidState,
    /// The user-supplied handler returned an error.
    #[error("task execution failed: {0}")]
    TaskExecutionFailed(String),
    /// `execute` was called on a task with no handler configured.
    #[error("task has no handler configured")]
    TaskNoHandler,
    /// No claimer with the given id is registered on the platform.
    #[error("claimer not found")]
    ClaimerNotFound,
    /// The claimer is already running `max_concurrent` tasks.
    #[error("claimer has too many active tasks")]
    ClaimerTooManyTasks,
    /// The claimer's roles do not satisfy the task's requirements.
    #[error("claimer role mismatch")]
    ClaimerRoleMismatch,
    /// The claimer id is on the task's blacklist. Dominates a whitelist miss.
    #[error("claimer is blocked from this task")]
    ClaimerBlocked,
    /// The task has a non-empty whitelist that does not contain this claimer id,
    /// or the claimer is offline/paused and not currently accepting work.
    #[error("claimer is not allowed to claim this task")]
    ClaimerNotAllowed,
    /// The platform's task registry is at `max_queue_size`.
    #[error("platform queue is full")]
    PlatformQueueFull,
    /// No eligible Published task exists for this claimer right now.
    #[error("no available task for this claimer")]
    PlatformNoAvailableTask,
}

impl Error {
    /// The stable numeric code from spec §6. `SUCCESS` (0) has no variant here —
    /// see [`crate::TaskResult::ok`], which represents success as `error: None`
    /// rather than an `Error` value, since a "successful error" reads oddly in
    /// idiomatic Rust.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::TaskNotFound => 1001,
            Self::TaskStatusInvalid => 1002,
            Self::TaskAlreadyClaimed => 1003,
            Self::TaskCategoryMismatch => 1004,
            Self::TaskInvalidState => 1005,
            Self::TaskExecutionFailed(_) => 1006,
            Self::TaskNoHandler => 1007,
            Self::ClaimerNotFound => 2001,
            Self::ClaimerTooManyTasks => 2002,
            Self::ClaimerRoleMismatch => 2003,
            Self::ClaimerBlocked => 2004,
            Self::ClaimerNotAllowed => 2005,
            Self::PlatformQueueFull => 3001,
            Self::PlatformNoAvailableTask => 3002,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

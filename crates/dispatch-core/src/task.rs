//! The cancellable unit of work and its lifecycle state machine.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::priority;
use crate::result::TaskResult;
use crate::{lock, now_iso8601, now_millis};

/// Opaque task identifier, generated from a monotonic counter and the wall
/// clock at construction time. Stable for the task's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// Borrows the underlying string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    TaskId(format!("task-{}-{seq}", now_millis()))
}

/// The task lifecycle state machine (spec §3).
///
/// ```text
/// Draft -> Published -> Claimed -> Processing -> Completed
///                                       |  ^--------/
///                                       v  (pause/resume)
///                                    Paused
/// ```
/// `Published` can also go to `Cancelled`; `Claimed`/`Processing`/`Paused`
/// can go to `Abandoned`; `Processing` can go to `Failed`; `Failed` and
/// `Abandoned` can be `republish`-ed back to `Published`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Constructed but not yet visible to claimers.
    Draft = 0,
    /// Visible and eligible to be claimed.
    Published = 1,
    /// Claimed by exactly one claimer, not yet running.
    Claimed = 2,
    /// Actively executing.
    Processing = 3,
    /// Execution suspended, resumable.
    Paused = 4,
    /// Terminal: finished successfully.
    Completed = 5,
    /// Terminal: finished with an error.
    Failed = 6,
    /// Terminal: cancelled while still unclaimed.
    Cancelled = 7,
    /// Terminal: claimer gave up on it.
    Abandoned = 8,
}

impl TaskStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Draft,
            1 => Self::Published,
            2 => Self::Claimed,
            3 => Self::Processing,
            4 => Self::Paused,
            5 => Self::Completed,
            6 => Self::Failed,
            7 => Self::Cancelled,
            _ => Self::Abandoned,
        }
    }

    /// True once a task can no longer transition anywhere.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Abandoned)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Claimed => "claimed",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// Events emitted by a [`Task`] over its lifetime, delivered synchronously
/// on the thread performing the transition.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Fired on every legal transition, including terminal ones.
    StatusChanged { old: TaskStatus, new: TaskStatus },
    /// Fired whenever `set_progress` changes the stored value.
    ProgressUpdated(u8),
    /// Fired when `try_claim` succeeds.
    Claimed { claimer_id: String },
    /// Fired when a task moves into `Processing` for the first time.
    Started,
    /// Fired when a task reaches `Completed`.
    Completed { result: TaskResult },
    /// Fired when a task reaches `Failed`.
    Failed { reason: String },
    /// Fired when a task reaches `Cancelled`.
    Cancelled,
    /// Fired when a task reaches `Abandoned`.
    Abandoned { claimer_id: Option<String>, reason: String },
    /// Fired on every call to `request_cancel`.
    CancelRequested { reason: String },
}

/// A handler supplied to a task to perform its actual work. Receives the
/// task (so it can poll [`Task::is_cancel_requested`] for cooperative
/// cancellation) and an opaque input string, and returns either a result or
/// a failure reason.
pub type TaskHandler = Box<dyn Fn(&Task, &str) -> std::result::Result<TaskResult, String> + Send + Sync>;

/// Fields mutated together under one lock, independent of the atomic status
/// word and timestamps.
struct TaskData {
    title: String,
    description: String,
    category: String,
    tags: HashSet<String>,
    metadata: HashMap<String, String>,
    priority: u8,
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
    claimer_id: Option<String>,
}

/// A cancellable, independently lockable unit of work.
///
/// `status` is an atomic word; every lifecycle transition is a single
/// `compare_exchange` and is the linearization point for that transition —
/// exactly one of any number of racing callers observes success (spec §5,
/// §8 "Atomic claim").
pub struct Task {
    id: TaskId,
    created_at: i64,
    published_at: AtomicI64,
    claimed_at: AtomicI64,
    started_at: AtomicI64,
    completed_at: AtomicI64,
    status: AtomicU8,
    progress: AtomicU8,
    cancel_requested: AtomicBool,
    auto_cleanup: AtomicBool,
    data: Mutex<TaskData>,
    handler: Mutex<Option<TaskHandler>>,
    events: Emitter<TaskEvent>,
}

const UNSET: i64 = 0;

impl Task {
    /// Builds a new `Draft` task with the given title. Everything else
    /// defaults empty/unset and can be set via the builder-style `with_*`
    /// methods before `publish`.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: next_task_id(),
            created_at: now_millis(),
            published_at: AtomicI64::new(UNSET),
            claimed_at: AtomicI64::new(UNSET),
            started_at: AtomicI64::new(UNSET),
            completed_at: AtomicI64::new(UNSET),
            status: AtomicU8::new(TaskStatus::Draft as u8),
            progress: AtomicU8::new(0),
            cancel_requested: AtomicBool::new(false),
            auto_cleanup: AtomicBool::new(false),
            data: Mutex::new(TaskData {
                title: title.into(),
                description: String::new(),
                category: String::new(),
                tags: HashSet::new(),
                metadata: HashMap::new(),
                priority: priority::NORMAL,
                whitelist: HashSet::new(),
                blacklist: HashSet::new(),
                claimer_id: None,
            }),
            handler: Mutex::new(None),
            events: Emitter::new(),
        }
    }

    // -- builder-style setters, legal any time before publish but not enforced --

    /// Sets the description.
    pub fn set_description(&self, description: impl Into<String>) {
        lock(&self.data).description = description.into();
    }

    /// Sets the category used for affinity matching.
    pub fn set_category(&self, category: impl Into<String>) {
        lock(&self.data).category = category.into();
    }

    /// Replaces the tag set.
    pub fn set_tags(&self, tags: impl IntoIterator<Item = String>) {
        lock(&self.data).tags = tags.into_iter().collect();
    }

    /// Sets one metadata entry.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.data).metadata.insert(key.into(), value.into());
    }

    /// Sets the priority, clamped to `[0, 100]`.
    pub fn set_priority(&self, priority: i32) {
        lock(&self.data).priority = crate::priority::clamp(priority);
    }

    /// Replaces the claimer whitelist. An empty whitelist allows any
    /// claimer not on the blacklist.
    pub fn set_whitelist(&self, ids: impl IntoIterator<Item = String>) {
        lock(&self.data).whitelist = ids.into_iter().collect();
    }

    /// Replaces the claimer blacklist. Blacklist always dominates whitelist.
    pub fn set_blacklist(&self, ids: impl IntoIterator<Item = String>) {
        lock(&self.data).blacklist = ids.into_iter().collect();
    }

    /// Enables or disables eligibility for `Platform::clear_by_status`'s
    /// auto-cleanup mode.
    pub fn set_auto_cleanup(&self, enabled: bool) {
        self.auto_cleanup.store(enabled, Ordering::Relaxed);
    }

    /// True iff this task is eligible for `Platform::clear_by_status`'s
    /// auto-cleanup mode.
    #[must_use]
    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup.load(Ordering::Relaxed)
    }

    /// Installs the handler `execute` will invoke.
    pub fn set_handler(&self, handler: TaskHandler) {
        *lock(&self.handler) = Some(handler);
    }

    /// Subscribes to this task's lifecycle events.
    pub fn on_event<F>(&self, f: F) -> crate::SubscriptionId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(f)
    }

    // -- accessors --

    /// This task's id.
    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Current status, loaded with `Acquire` ordering.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Current progress, `0..=100`.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    /// Current priority, `0..=100`.
    #[must_use]
    pub fn priority(&self) -> u8 {
        lock(&self.data).priority
    }

    /// The category used for affinity matching, or empty if unset.
    #[must_use]
    pub fn category(&self) -> String {
        lock(&self.data).category.clone()
    }

    /// Copy of the current tag set.
    #[must_use]
    pub fn tags(&self) -> HashSet<String> {
        lock(&self.data).tags.clone()
    }

    /// The id of the claimer currently holding this task, if any.
    #[must_use]
    pub fn claimer_id(&self) -> Option<String> {
        lock(&self.data).claimer_id.clone()
    }

    /// Copy of the metadata map.
    #[must_use]
    pub fn metadata(&self) -> HashMap<String, String> {
        lock(&self.data).metadata.clone()
    }

    /// Title.
    #[must_use]
    pub fn title(&self) -> String {
        lock(&self.data).title.clone()
    }

    /// True once `request_cancel` has been called and no terminal/finalize
    /// step has superseded it.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Creation timestamp, ms since epoch.
    #[must_use]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    fn timestamp(atomic: &AtomicI64) -> Option<i64> {
        match atomic.load(Ordering::Acquire) {
            UNSET => None,
            ms => Some(ms),
        }
    }

    /// When `publish` succeeded, if ever.
    #[must_use]
    pub fn published_at(&self) -> Option<i64> {
        Self::timestamp(&self.published_at)
    }

    /// When `try_claim` succeeded, if ever.
    #[must_use]
    pub fn claimed_at(&self) -> Option<i64> {
        Self::timestamp(&self.claimed_at)
    }

    /// When the task first entered `Processing`, if ever.
    #[must_use]
    pub fn started_at(&self) -> Option<i64> {
        Self::timestamp(&self.started_at)
    }

    /// When the task reached a terminal state, if ever.
    #[must_use]
    pub fn completed_at(&self) -> Option<i64> {
        Self::timestamp(&self.completed_at)
    }

    /// True iff a claimer with `claimer_id` is permitted to claim this
    /// task: not on the blacklist, and either the whitelist is empty or it
    /// contains the id. Blacklist dominates whitelist.
    #[must_use]
    pub fn is_claimer_allowed(&self, claimer_id: &str) -> bool {
        let data = lock(&self.data);
        if data.blacklist.contains(claimer_id) {
            return false;
        }
        data.whitelist.is_empty() || data.whitelist.contains(claimer_id)
    }

    /// True iff a direct transition from the current status to `target` is
    /// legal, without attempting it.
    #[must_use]
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::{
            Abandoned, Cancelled, Claimed, Completed, Draft, Failed, Paused, Processing, Published,
        };
        matches!(
            (self.status(), target),
            (Draft, Published)
                | (Published, Claimed)
                | (Published, Cancelled)
                | (Claimed, Processing)
                | (Claimed, Abandoned)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Paused)
                | (Processing, Abandoned)
                | (Paused, Processing)
                | (Paused, Abandoned)
                | (Failed, Published)
                | (Abandoned, Published)
        )
    }

    fn cas_status(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cas_status_any(&self, from: &[TaskStatus], to: TaskStatus) -> Option<TaskStatus> {
        for &candidate in from {
            if self.cas_status(candidate, to) {
                return Some(candidate);
            }
        }
        None
    }

    fn emit_transition(&self, old: TaskStatus, new: TaskStatus) {
        tracing::info!(task = %self.id, %old, %new, "task status changed");
        self.events.emit(&TaskEvent::StatusChanged { old, new });
    }

    // -- lifecycle operations (spec §4.1) --

    /// `Draft -> Published`. Records `published_at`.
    pub fn publish(&self) -> Result<()> {
        if !self.cas_status(TaskStatus::Draft, TaskStatus::Published) {
            return Err(Error::TaskStatusInvalid);
        }
        self.published_at.store(now_millis(), Ordering::Release);
        self.emit_transition(TaskStatus::Draft, TaskStatus::Published);
        Ok(())
    }

    /// Atomic CAS attempt at `Published -> Claimed`. The single winner among
    /// any number of racing callers records `claimer_id` and `claimed_at`.
    /// Checks authorization first; an unauthorized caller never perturbs
    /// the status word.
    pub fn try_claim(&self, claimer_id: &str) -> Result<()> {
        if !self.is_claimer_allowed(claimer_id) {
            let blocked = lock(&self.data).blacklist.contains(claimer_id);
            tracing::debug!(task = %self.id, claimer_id, blocked, "claim rejected by authorization");
            return Err(if blocked {
                Error::ClaimerBlocked
            } else {
                Error::ClaimerNotAllowed
            });
        }
        if !self.cas_status(TaskStatus::Published, TaskStatus::Claimed) {
            return Err(Error::TaskAlreadyClaimed);
        }
        lock(&self.data).claimer_id = Some(claimer_id.to_string());
        self.claimed_at.store(now_millis(), Ordering::Release);
        self.emit_transition(TaskStatus::Published, TaskStatus::Claimed);
        self.events.emit(&TaskEvent::Claimed {
            claimer_id: claimer_id.to_string(),
        });
        Ok(())
    }

    /// `Claimed -> Processing`. Records `started_at` the first time this
    /// succeeds.
    pub fn start(&self) -> Result<()> {
        if !self.cas_status(TaskStatus::Claimed, TaskStatus::Processing) {
            return Err(Error::TaskStatusInvalid);
        }
        self.started_at.store(now_millis(), Ordering::Release);
        self.emit_transition(TaskStatus::Claimed, TaskStatus::Processing);
        self.events.emit(&TaskEvent::Started);
        Ok(())
    }

    /// `Processing -> Paused`.
    pub fn pause(&self) -> Result<()> {
        if !self.cas_status(TaskStatus::Processing, TaskStatus::Paused) {
            return Err(Error::TaskStatusInvalid);
        }
        self.emit_transition(TaskStatus::Processing, TaskStatus::Paused);
        Ok(())
    }

    /// `Paused -> Processing`.
    pub fn resume(&self) -> Result<()> {
        if !self.cas_status(TaskStatus::Paused, TaskStatus::Processing) {
            return Err(Error::TaskStatusInvalid);
        }
        self.emit_transition(TaskStatus::Paused, TaskStatus::Processing);
        Ok(())
    }

    /// `Processing -> Completed`. Sets progress to 100 and records
    /// `completed_at`.
    pub fn complete(&self, result: TaskResult) -> Result<()> {
        if !self.cas_status(TaskStatus::Processing, TaskStatus::Completed) {
            return Err(Error::TaskStatusInvalid);
        }
        self.progress.store(100, Ordering::Release);
        self.completed_at.store(now_millis(), Ordering::Release);
        self.emit_transition(TaskStatus::Processing, TaskStatus::Completed);
        self.events.emit(&TaskEvent::Completed { result });
        Ok(())
    }

    /// `Processing -> Failed`.
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        if !self.cas_status(TaskStatus::Processing, TaskStatus::Failed) {
            return Err(Error::TaskStatusInvalid);
        }
        let reason = reason.into();
        self.completed_at.store(now_millis(), Ordering::Release);
        tracing::warn!(task = %self.id, %reason, "task failed");
        self.emit_transition(TaskStatus::Processing, TaskStatus::Failed);
        self.events.emit(&TaskEvent::Failed { reason });
        Ok(())
    }

    /// `{Claimed, Processing, Paused} -> Abandoned`. `claimer_id` stays set
    /// — it records who abandoned it — and is only cleared by `republish`.
    pub fn abandon(&self, reason: impl Into<String>) -> Result<()> {
        let from = self
            .cas_status_any(
                &[TaskStatus::Claimed, TaskStatus::Processing, TaskStatus::Paused],
                TaskStatus::Abandoned,
            )
            .ok_or(Error::TaskStatusInvalid)?;
        let claimer_id = lock(&self.data).claimer_id.clone();
        self.completed_at.store(now_millis(), Ordering::Release);
        let reason = reason.into();
        tracing::warn!(task = %self.id, claimer_id = ?claimer_id, %reason, "task abandoned");
        self.emit_transition(from, TaskStatus::Abandoned);
        self.events.emit(&TaskEvent::Abandoned {
            claimer_id,
            reason,
        });
        Ok(())
    }

    /// `Published -> Cancelled`. For already-claimed tasks, use
    /// `request_cancel` for cooperative cancellation instead.
    pub fn cancel(&self) -> Result<()> {
        if !self.cas_status(TaskStatus::Published, TaskStatus::Cancelled) {
            return Err(Error::TaskStatusInvalid);
        }
        self.completed_at.store(now_millis(), Ordering::Release);
        self.emit_transition(TaskStatus::Published, TaskStatus::Cancelled);
        self.events.emit(&TaskEvent::Cancelled);
        Ok(())
    }

    /// `{Failed, Abandoned} -> Published`. Clears `claimer_id` and resets
    /// `claimed_at`/`started_at`/`completed_at`/`progress`/the cancel flag
    /// for a fresh attempt.
    pub fn republish(&self) -> Result<()> {
        let from = self
            .cas_status_any(&[TaskStatus::Failed, TaskStatus::Abandoned], TaskStatus::Published)
            .ok_or(Error::TaskStatusInvalid)?;
        lock(&self.data).claimer_id = None;
        self.claimed_at.store(UNSET, Ordering::Release);
        self.started_at.store(UNSET, Ordering::Release);
        self.completed_at.store(UNSET, Ordering::Release);
        self.progress.store(0, Ordering::Release);
        self.cancel_requested.store(false, Ordering::Release);
        self.published_at.store(now_millis(), Ordering::Release);
        self.emit_transition(from, TaskStatus::Published);
        Ok(())
    }

    /// Cooperative cancellation signal. Legal in any status; does not by
    /// itself transition the task. A running handler is expected to poll
    /// `is_cancel_requested` and call `abandon`/return an error promptly.
    pub fn request_cancel(&self, reason: impl Into<String>) {
        self.cancel_requested.store(true, Ordering::Release);
        let reason = reason.into();
        {
            let mut data = lock(&self.data);
            data.metadata.insert("cancel.reason".to_string(), reason.clone());
            data.metadata
                .insert("cancel.requested_at".to_string(), now_iso8601());
        }
        self.events.emit(&TaskEvent::CancelRequested { reason });
    }

    /// Sets progress, clamped to `0..=100`. No-op if unchanged.
    pub fn set_progress(&self, value: i32) {
        let clamped = value.clamp(0, 100) as u8;
        let previous = self.progress.swap(clamped, Ordering::AcqRel);
        if previous != clamped {
            self.events.emit(&TaskEvent::ProgressUpdated(clamped));
        }
    }

    /// Runs the installed handler to completion and drives the task to its
    /// terminal state.
    ///
    /// The handler lock serializes concurrent calls to `execute` on the
    /// same task (spec §5); it is held for the duration of the call.
    /// Requires the task to be `Claimed` or `Processing`; `Claimed` is
    /// advanced to `Processing` first.
    pub fn execute(&self, input: &str) -> Result<TaskResult> {
        let handler_guard = lock(&self.handler);
        match self.status() {
            TaskStatus::Claimed => self.start()?,
            TaskStatus::Processing => {}
            _ => return Err(Error::TaskStatusInvalid),
        }
        let handler = handler_guard.as_ref().ok_or(Error::TaskNoHandler)?;
        match handler(self, input) {
            Ok(result) => {
                self.complete(result.clone())?;
                Ok(result)
            }
            Err(reason) => {
                self.fail(reason.clone())?;
                Err(Error::TaskExecutionFailed(reason))
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn publish_then_claim_then_lifecycle() {
        let task = Task::new("demo");
        assert_eq!(task.status(), TaskStatus::Draft);
        task.publish().unwrap();
        assert_eq!(task.status(), TaskStatus::Published);

        task.try_claim("alice").unwrap();
        assert_eq!(task.status(), TaskStatus::Claimed);
        assert_eq!(task.claimer_id().as_deref(), Some("alice"));

        task.start().unwrap();
        assert_eq!(task.status(), TaskStatus::Processing);

        task.complete(TaskResult::ok("done", "42")).unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.progress(), 100);
    }

    #[test]
    fn publish_twice_is_rejected() {
        let task = Task::new("demo");
        task.publish().unwrap();
        assert_eq!(task.publish().unwrap_err(), Error::TaskStatusInvalid);
    }

    #[test]
    fn blacklist_dominates_whitelist() {
        let task = Task::new("demo");
        task.set_whitelist(["alice".to_string(), "bob".to_string()]);
        task.set_blacklist(["alice".to_string()]);
        task.publish().unwrap();

        assert!(!task.is_claimer_allowed("alice"));
        assert!(task.is_claimer_allowed("bob"));
        assert!(!task.is_claimer_allowed("carol"));

        assert_eq!(task.try_claim("alice").unwrap_err(), Error::ClaimerBlocked);
        assert_eq!(task.try_claim("carol").unwrap_err(), Error::ClaimerNotAllowed);
        task.try_claim("bob").unwrap();
    }

    #[test]
    fn exactly_one_claimer_wins_a_race() {
        let task = Arc::new(Task::new("demo"));
        task.publish().unwrap();
        let wins = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for n in 0..20 {
                let task = task.clone();
                let wins = wins.clone();
                scope.spawn(move || {
                    if task.try_claim(&format!("claimer-{n}")).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(task.status(), TaskStatus::Claimed);
    }

    #[test]
    fn abandon_keeps_claimer_and_republish_clears_it() {
        let task = Task::new("demo");
        task.publish().unwrap();
        task.try_claim("alice").unwrap();
        task.abandon("gave up").unwrap();
        assert_eq!(task.status(), TaskStatus::Abandoned);
        assert_eq!(task.claimer_id().as_deref(), Some("alice"));

        task.republish().unwrap();
        assert_eq!(task.status(), TaskStatus::Published);
        assert!(task.claimer_id().is_none());
        assert_eq!(task.progress(), 0);
    }

    #[test]
    fn finalize_is_idempotent_under_concurrency() {
        let task = Arc::new(Task::new("demo"));
        task.publish().unwrap();
        task.try_claim("alice").unwrap();
        task.start().unwrap();
        let successes = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for _ in 0..8 {
                let task = task.clone();
                let successes = successes.clone();
                scope.spawn(move || {
                    if task.complete(TaskResult::ok("done", "")).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn cooperative_cancel_is_observable_by_handler() {
        let task = Task::new("demo");
        task.set_handler(Box::new(|task, _input| {
            if task.is_cancel_requested() {
                Err("cancelled".to_string())
            } else {
                Ok(TaskResult::ok("ran", ""))
            }
        }));
        task.publish().unwrap();
        task.try_claim("alice").unwrap();
        task.request_cancel("user requested");
        assert!(task.is_cancel_requested());

        let result = task.execute("input");
        assert!(result.is_err());
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[test]
    fn execute_without_handler_errors() {
        let task = Task::new("demo");
        task.publish().unwrap();
        task.try_claim("alice").unwrap();
        assert_eq!(task.execute("x").unwrap_err(), Error::TaskNoHandler);
    }
}

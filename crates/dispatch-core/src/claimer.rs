//! Concurrency-bounded worker identity that claims and runs tasks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::lock;
use crate::platform::Platform;
use crate::result::TaskResult;
use crate::task::{Task, TaskId};

/// Derived status of a [`Claimer`], computed fresh from its orthogonal
/// atomic flags each time it's read — never stored.
///
/// `Offline` takes priority over `Paused`: a claimer that is both offline
/// and paused reports `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimerStatus {
    /// Not accepting any work; `set_offline(true)`.
    Offline,
    /// Accepting no new claims but still running what it has.
    Paused,
    /// At `max_concurrent` active tasks.
    Busy,
    /// Accepting work.
    Idle,
}

/// Events emitted by a [`Claimer`], delivered synchronously on the thread
/// performing the operation.
#[derive(Debug, Clone)]
pub enum ClaimerEvent {
    /// A task was successfully claimed.
    TaskClaimed(TaskId),
    /// A claimed task began running.
    TaskStarted(TaskId),
    /// A task finished successfully and accounting was finalized.
    TaskCompleted(TaskId, TaskResult),
    /// A task was abandoned and accounting was finalized.
    TaskAbandoned(TaskId, String),
    /// Derived status changed.
    StatusChanged { old: ClaimerStatus, new: ClaimerStatus },
}

/// A worker identity: a name, a concurrency budget, and the set of tasks it
/// currently holds.
pub struct Claimer {
    id: String,
    name: Mutex<String>,
    offline: AtomicBool,
    paused: AtomicBool,
    max_concurrent: AtomicU32,
    active_task_count: AtomicU32,
    categories: Mutex<HashSet<String>>,
    roles: Mutex<HashSet<String>>,
    claimed_tasks: Mutex<HashMap<TaskId, Arc<Task>>>,
    total_claimed: AtomicU64,
    total_completed: AtomicU64,
    total_abandoned: AtomicU64,
    platform: Mutex<Option<Weak<Platform>>>,
    self_weak: OnceLock<Weak<Claimer>>,
    events: Emitter<ClaimerEvent>,
}

impl Claimer {
    /// Builds a new claimer, not attached to any platform yet.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, max_concurrent: u32) -> Arc<Self> {
        let claimer = Arc::new(Self {
            id: id.into(),
            name: Mutex::new(name.into()),
            offline: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            max_concurrent: AtomicU32::new(max_concurrent.max(1)),
            active_task_count: AtomicU32::new(0),
            categories: Mutex::new(HashSet::new()),
            roles: Mutex::new(HashSet::new()),
            claimed_tasks: Mutex::new(HashMap::new()),
            total_claimed: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_abandoned: AtomicU64::new(0),
            platform: Mutex::new(None),
            self_weak: OnceLock::new(),
            events: Emitter::new(),
        });
        let _ = claimer.self_weak.set(Arc::downgrade(&claimer));
        claimer
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .get()
            .and_then(Weak::upgrade)
            .expect("Claimer constructed via Claimer::new")
    }

    /// Attaches this claimer to a platform. Called by
    /// `Platform::register_claimer`.
    pub(crate) fn set_platform(&self, platform: &Arc<Platform>) {
        *lock(&self.platform) = Some(Arc::downgrade(platform));
    }

    fn platform(&self) -> Result<Arc<Platform>> {
        lock(&self.platform)
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::ClaimerNotFound)
    }

    /// Subscribes to this claimer's events.
    pub fn on_event<F>(&self, f: F) -> crate::SubscriptionId
    where
        F: Fn(&ClaimerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(f)
    }

    // -- accessors --

    /// This claimer's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> String {
        lock(&self.name).clone()
    }

    /// Replaces the category set used for affinity scoring.
    pub fn set_categories(&self, categories: impl IntoIterator<Item = String>) {
        *lock(&self.categories) = categories.into_iter().collect();
    }

    /// Current category set.
    #[must_use]
    pub fn categories(&self) -> HashSet<String> {
        lock(&self.categories).clone()
    }

    /// Replaces the role set.
    pub fn set_roles(&self, roles: impl IntoIterator<Item = String>) {
        *lock(&self.roles) = roles.into_iter().collect();
    }

    /// Current role set. Carried through from the data model (spec §3) for
    /// callers that want to filter claimers by role themselves; no
    /// operation in this crate enforces role matching on its own.
    #[must_use]
    pub fn roles(&self) -> HashSet<String> {
        lock(&self.roles).clone()
    }

    /// Maximum number of tasks this claimer will hold concurrently.
    #[must_use]
    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent.load(Ordering::Acquire)
    }

    /// Number of tasks currently claimed.
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_task_count.load(Ordering::Acquire)
    }

    fn with_status_transition(&self, f: impl FnOnce()) {
        let before = self.status();
        f();
        let after = self.status();
        if before != after {
            tracing::info!(claimer = %self.id, old = ?before, new = ?after, "claimer status changed");
            self.events
                .emit(&ClaimerEvent::StatusChanged { old: before, new: after });
        }
    }

    /// Derived status: `Offline` > `Paused` > `Busy` > `Idle`.
    #[must_use]
    pub fn status(&self) -> ClaimerStatus {
        if self.offline.load(Ordering::Acquire) {
            ClaimerStatus::Offline
        } else if self.paused.load(Ordering::Acquire) {
            ClaimerStatus::Paused
        } else if self.active_task_count.load(Ordering::Acquire) >= self.max_concurrent.load(Ordering::Acquire) {
            ClaimerStatus::Busy
        } else {
            ClaimerStatus::Idle
        }
    }

    /// Sets offline/online. `true` stops all new claims regardless of the
    /// pause flag.
    pub fn set_offline(&self, offline: bool) {
        self.with_status_transition(|| self.offline.store(offline, Ordering::Release));
    }

    /// Sets paused/unpaused. Has no visible effect while offline.
    pub fn set_paused(&self, paused: bool) {
        self.with_status_transition(|| self.paused.store(paused, Ordering::Release));
    }

    /// True iff this claimer would currently accept another claim: not
    /// offline, not paused, and under its concurrency budget.
    #[must_use]
    pub fn can_claim_more(&self) -> bool {
        !self.offline.load(Ordering::Acquire)
            && !self.paused.load(Ordering::Acquire)
            && self.active_task_count.load(Ordering::Acquire) < self.max_concurrent.load(Ordering::Acquire)
    }

    /// True iff this claimer currently holds `task_id`.
    #[must_use]
    pub fn has_task(&self, task_id: &TaskId) -> bool {
        lock(&self.claimed_tasks).contains_key(task_id)
    }

    /// The task this claimer holds with the given id, if any.
    #[must_use]
    pub fn get_task(&self, task_id: &TaskId) -> Option<Arc<Task>> {
        lock(&self.claimed_tasks).get(task_id).cloned()
    }

    /// All tasks currently held.
    #[must_use]
    pub fn held_tasks(&self) -> Vec<Arc<Task>> {
        lock(&self.claimed_tasks).values().cloned().collect()
    }

    /// Affinity score in `[0, 100]` for claiming `task`:
    /// `50*match(category) + 30*(matching_tags/|tags|) + 20*(priority/100)`.
    ///
    /// An empty tag set contributes 0 to the tag term (rather than treating
    /// the ratio as vacuously 100%) since there is nothing to match against.
    #[must_use]
    pub fn calculate_match_score(&self, task: &Task) -> u32 {
        let categories = lock(&self.categories);
        let category = task.category();
        let category_term = if !category.is_empty() && categories.contains(&category) {
            50
        } else {
            0
        };

        let tags = task.tags();
        let tag_term = if tags.is_empty() {
            0
        } else {
            let matching = tags.iter().filter(|tag| categories.contains(*tag)).count();
            (30.0 * (matching as f64 / tags.len() as f64)) as u32
        };

        let priority_term = (20.0 * (f64::from(task.priority()) / 100.0)) as u32;

        (category_term + tag_term + priority_term).min(100)
    }

    /// Claims `task` for this claimer: checks its own capacity, then
    /// delegates to `task.try_claim` (the actual linearization point).
    pub fn claim(&self, task: &Arc<Task>) -> Result<()> {
        if self.offline.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            return Err(Error::ClaimerNotAllowed);
        }
        if self.active_task_count.load(Ordering::Acquire) >= self.max_concurrent.load(Ordering::Acquire) {
            return Err(Error::ClaimerTooManyTasks);
        }
        task.try_claim(&self.id)?;

        lock(&self.claimed_tasks).insert(task.id().clone(), task.clone());
        self.with_status_transition(|| {
            self.active_task_count.fetch_add(1, Ordering::AcqRel);
        });
        self.total_claimed.fetch_add(1, Ordering::Relaxed);
        self.events.emit(&ClaimerEvent::TaskClaimed(task.id().clone()));
        Ok(())
    }

    /// Claims the highest-priority eligible `Published` task from this
    /// claimer's platform.
    pub fn claim_next(&self) -> Result<Arc<Task>> {
        self.platform()?.claim_next(&self.arc())
    }

    /// Claims the best-affinity eligible `Published` task from this
    /// claimer's platform.
    pub fn claim_matching(&self) -> Result<Arc<Task>> {
        self.platform()?.claim_matching(&self.arc())
    }

    /// Repeatedly calls `claim_matching` until capacity is exhausted or no
    /// eligible task remains.
    pub fn claim_to_capacity(&self) -> Vec<Arc<Task>> {
        let mut claimed = Vec::new();
        while self.can_claim_more() {
            match self.claim_matching() {
                Ok(task) => claimed.push(task),
                Err(_) => break,
            }
        }
        claimed
    }

    /// Runs `task`'s handler and finalizes accounting via `complete` or
    /// `abandon` — those are the only two outcomes (spec §4.2). Requires
    /// `task` to already be claimed by this claimer; returns a failed
    /// `TaskResult` rather than propagating an `Error` otherwise, since the
    /// contract is "always returns a `TaskResult`".
    pub fn run(&self, task: &Arc<Task>, input: &str) -> TaskResult {
        if task.claimer_id().as_deref() != Some(self.id.as_str()) {
            return TaskResult::failed(Error::ClaimerNotAllowed);
        }
        self.events.emit(&ClaimerEvent::TaskStarted(task.id().clone()));

        match task.execute(input) {
            Ok(result) => {
                self.complete(task.id(), result.clone());
                result
            }
            Err(Error::TaskExecutionFailed(reason)) => {
                let _ = self.abandon(task.id(), reason.clone());
                TaskResult::failed(Error::TaskExecutionFailed(reason))
            }
            Err(other) => TaskResult::failed(other),
        }
    }

    /// Idempotent finalize: drives `task` to `Completed` if it isn't
    /// already, then removes it from this claimer's held set exactly once.
    /// Redundant calls (task already removed) return `TaskNotFound` and do
    /// nothing further.
    pub fn complete(&self, task_id: &TaskId, result: TaskResult) -> Result<()> {
        if let Some(task) = self.get_task(task_id) {
            let _ = task.start();
            let _ = task.complete(result.clone());
        }
        let removed = lock(&self.claimed_tasks).remove(task_id);
        if removed.is_none() {
            tracing::debug!(task = %task_id, claimer = %self.id, "redundant complete() ignored");
            return Err(Error::TaskNotFound);
        }
        self.with_status_transition(|| {
            self.active_task_count.fetch_sub(1, Ordering::AcqRel);
        });
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        self.events
            .emit(&ClaimerEvent::TaskCompleted(task_id.clone(), result));
        Ok(())
    }

    /// Idempotent finalize: drives `task` to `Abandoned` if it isn't
    /// already, then removes it from this claimer's held set exactly once.
    pub fn abandon(&self, task_id: &TaskId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        if let Some(task) = self.get_task(task_id) {
            let _ = task.abandon(reason.clone());
        }
        let removed = lock(&self.claimed_tasks).remove(task_id);
        if removed.is_none() {
            tracing::debug!(task = %task_id, claimer = %self.id, "redundant abandon() ignored");
            return Err(Error::TaskNotFound);
        }
        self.with_status_transition(|| {
            self.active_task_count.fetch_sub(1, Ordering::AcqRel);
        });
        self.total_abandoned.fetch_add(1, Ordering::Relaxed);
        self.events
            .emit(&ClaimerEvent::TaskAbandoned(task_id.clone(), reason));
        Ok(())
    }

    /// Pauses a held task without touching accounting.
    pub fn pause_task(&self, task_id: &TaskId) -> Result<()> {
        self.get_task(task_id).ok_or(Error::TaskNotFound)?.pause()
    }

    /// Resumes a held, paused task without touching accounting.
    pub fn resume_task(&self, task_id: &TaskId) -> Result<()> {
        self.get_task(task_id).ok_or(Error::TaskNotFound)?.resume()
    }

    /// Snapshot of lifetime counters.
    #[must_use]
    pub fn statistics(&self) -> ClaimerStatistics {
        ClaimerStatistics {
            total_claimed: self.total_claimed.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_abandoned: self.total_abandoned.load(Ordering::Relaxed),
            active_task_count: self.active_task_count.load(Ordering::Relaxed),
        }
    }
}

/// Lifetime accounting counters for a [`Claimer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimerStatistics {
    /// Total successful `claim` calls.
    pub total_claimed: u64,
    /// Total tasks finalized as completed.
    pub total_completed: u64,
    /// Total tasks finalized as abandoned (including handler failures).
    pub total_abandoned: u64,
    /// Currently held task count.
    pub active_task_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    #[test]
    fn status_prefers_offline_over_paused() {
        let claimer = Claimer::new("c1", "worker one", 2);
        claimer.set_paused(true);
        claimer.set_offline(true);
        assert_eq!(claimer.status(), ClaimerStatus::Offline);
    }

    #[test]
    fn status_reflects_capacity() {
        let claimer = Claimer::new("c1", "worker one", 1);
        assert_eq!(claimer.status(), ClaimerStatus::Idle);

        let task = Arc::new(Task::new("t"));
        task.publish().unwrap();
        claimer.claim(&task).unwrap();
        assert_eq!(claimer.status(), ClaimerStatus::Busy);
    }

    #[test]
    fn claim_respects_capacity() {
        let claimer = Claimer::new("c1", "worker one", 1);
        let t1 = Arc::new(Task::new("t1"));
        t1.publish().unwrap();
        let t2 = Arc::new(Task::new("t2"));
        t2.publish().unwrap();

        claimer.claim(&t1).unwrap();
        assert_eq!(claimer.claim(&t2).unwrap_err(), Error::ClaimerTooManyTasks);
    }

    #[test]
    fn complete_is_idempotent() {
        let claimer = Claimer::new("c1", "worker one", 2);
        let task = Arc::new(Task::new("t"));
        task.publish().unwrap();
        claimer.claim(&task).unwrap();

        claimer.complete(task.id(), TaskResult::ok("done", "")).unwrap();
        assert_eq!(claimer.active_task_count(), 0);
        assert_eq!(
            claimer.complete(task.id(), TaskResult::ok("done", "")).unwrap_err(),
            Error::TaskNotFound
        );
        assert_eq!(claimer.statistics().total_completed, 1);
    }

    #[test]
    fn affinity_score_combines_category_tags_priority() {
        let claimer = Claimer::new("c1", "worker one", 2);
        claimer.set_categories(["images".to_string(), "thumbnails".to_string()]);

        let task = Task::new("t");
        task.set_category("images");
        task.set_tags(["thumbnails".to_string(), "other".to_string()]);
        task.set_priority(100);

        // 50 (category) + 30 * (1/2) (one of two tags matches) + 20 (priority 100%)
        assert_eq!(claimer.calculate_match_score(&task), 85);
    }
}

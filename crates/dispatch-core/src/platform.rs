//! The shared registry mediating between tasks and claimers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::claimer::Claimer;
use crate::error::{Error, Result};
use crate::events::Emitter;
use crate::lock;
use crate::task::{Task, TaskId, TaskStatus};

/// Construction-time configuration for a [`Platform`].
#[derive(Debug, Clone, Copy)]
pub struct PlatformConfig {
    /// Maximum number of tasks the registry will hold at once.
    pub max_queue_size: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self { max_queue_size: 10_000 }
    }
}

/// Events emitted by a [`Platform`], delivered synchronously on the thread
/// performing the operation.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// A task was published (or re-published).
    TaskPublished(TaskId),
    /// A task was claimed.
    TaskClaimed(TaskId),
    /// A task started running.
    TaskStarted(TaskId),
    /// A task completed.
    TaskCompleted(TaskId),
    /// A task failed.
    TaskFailed(TaskId),
    /// A published task was cancelled outright.
    TaskCancelled(TaskId),
    /// Cooperative cancellation was requested on a running task.
    TaskCancelRequested(TaskId),
    /// A task was removed from the registry.
    TaskDeleted(TaskId),
    /// A claimer was registered.
    ClaimerRegistered(String),
    /// A claimer was unregistered.
    ClaimerUnregistered(String),
}

/// Filter applied by `Platform::tasks_matching`. Every populated field is
/// ANDed together; `None`/empty means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to this status.
    pub status: Option<TaskStatus>,
    /// Restrict to this category.
    pub category: Option<String>,
    /// Restrict to priority >= this value.
    pub min_priority: Option<u8>,
    /// Restrict to priority <= this value.
    pub max_priority: Option<u8>,
    /// Restrict to tasks carrying at least one of these tags.
    pub tags: Vec<String>,
    /// Restrict to tasks currently held by this claimer id.
    pub claimer_id: Option<String>,
}

/// Point-in-time counts across the task registry.
#[derive(Debug, Clone, Default)]
pub struct PlatformStatistics {
    /// Total tasks currently registered, any status.
    pub total_tasks: usize,
    /// Count of tasks per status.
    pub by_status: HashMap<TaskStatus, usize>,
    /// Number of registered claimers.
    pub claimer_count: usize,
}

/// Insertion-ordered task registry: a `Vec` for stable iteration order
/// (used as the tie-break for equal-priority/equal-affinity claim
/// candidates) plus a `HashMap` for O(1) lookup.
#[derive(Default)]
struct TaskRegistry {
    order: Vec<TaskId>,
    by_id: HashMap<TaskId, Arc<Task>>,
}

impl TaskRegistry {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn insert(&mut self, task: Arc<Task>) {
        let id = task.id().clone();
        if self.by_id.insert(id.clone(), task).is_none() {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &TaskId) -> Option<Arc<Task>> {
        let removed = self.by_id.remove(id);
        if removed.is_some() {
            self.order.retain(|existing| existing != id);
        }
        removed
    }

    fn get(&self, id: &TaskId) -> Option<Arc<Task>> {
        self.by_id.get(id).cloned()
    }

    fn iter_in_order(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// The shared registry. `publish`, `claim*`, `remove`, and `cancel` are the
/// operations a host program drives; `tasks_matching` and friends are
/// read-only queries.
pub struct Platform {
    tasks: Mutex<TaskRegistry>,
    claimers: Mutex<HashMap<String, Arc<Claimer>>>,
    max_queue_size: usize,
    self_weak: OnceLock<Weak<Platform>>,
    events: Emitter<PlatformEvent>,
}

impl Platform {
    /// Builds an empty platform.
    #[must_use]
    pub fn new(config: PlatformConfig) -> Arc<Self> {
        let platform = Arc::new(Self {
            tasks: Mutex::new(TaskRegistry::default()),
            claimers: Mutex::new(HashMap::new()),
            max_queue_size: config.max_queue_size,
            self_weak: OnceLock::new(),
            events: Emitter::new(),
        });
        let _ = platform.self_weak.set(Arc::downgrade(&platform));
        platform
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .get()
            .and_then(Weak::upgrade)
            .expect("Platform constructed via Platform::new")
    }

    /// Subscribes to platform-level events.
    pub fn on_event<F>(&self, f: F) -> crate::SubscriptionId
    where
        F: Fn(&PlatformEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(f)
    }

    // -- task registry operations (spec §4.3) --

    /// Registers `task` and publishes it if it is still `Draft`. Rejects
    /// the task if the registry is already at `max_queue_size`.
    pub fn publish(&self, task: Arc<Task>) -> Result<TaskId> {
        {
            let mut registry = lock(&self.tasks);
            if registry.len() >= self.max_queue_size {
                return Err(Error::PlatformQueueFull);
            }
            registry.insert(task.clone());
        }
        if task.status() == TaskStatus::Draft {
            task.publish()?;
        }
        tracing::info!(task = %task.id(), "task published");
        self.events.emit(&PlatformEvent::TaskPublished(task.id().clone()));
        Ok(task.id().clone())
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<Arc<Task>> {
        lock(&self.tasks).get(id)
    }

    /// True iff a task with this id is registered.
    #[must_use]
    pub fn has(&self, id: &TaskId) -> bool {
        lock(&self.tasks).by_id.contains_key(id)
    }

    /// Removes a task from the registry. Refuses to remove a task whose
    /// `claimer_id` is set unless `force` is set, in which case the holding
    /// claimer is made to abandon it first. This applies even to terminal
    /// tasks — `complete`/`fail` don't clear `claimer_id` either. Force-
    /// removal does not interrupt an already-running handler thread; it only
    /// detaches the task from the registry and the claimer's bookkeeping
    /// (spec's open question on force-remove is resolved this way — see
    /// DESIGN.md).
    pub fn remove(&self, id: &TaskId, force: bool) -> Result<()> {
        let claimer_id = {
            let registry = lock(&self.tasks);
            let task = registry.by_id.get(id).ok_or(Error::TaskNotFound)?;
            task.claimer_id()
        };

        if claimer_id.is_some() && !force {
            return Err(Error::TaskInvalidState);
        }

        lock(&self.tasks).remove(id);

        if force {
            if let Some(claimer_id) = claimer_id {
                if let Some(claimer) = self.get_claimer(&claimer_id) {
                    let _ = claimer.abandon(id, "force-removed from platform");
                }
            }
        }

        tracing::info!(task = %id, force, "task removed from platform");
        self.events.emit(&PlatformEvent::TaskDeleted(id.clone()));
        Ok(())
    }

    /// Cancels a task: outright if it is still `Published` (unclaimed), or
    /// cooperatively via `request_cancel` otherwise.
    pub fn cancel(&self, id: &TaskId) -> Result<()> {
        let task = self.get(id).ok_or(Error::TaskNotFound)?;
        if task.status() == TaskStatus::Published {
            task.cancel()?;
            self.events.emit(&PlatformEvent::TaskCancelled(id.clone()));
        } else {
            if task.status().is_terminal() {
                return Err(Error::TaskStatusInvalid);
            }
            task.request_cancel("cancelled via Platform::cancel");
            self.events.emit(&PlatformEvent::TaskCancelRequested(id.clone()));
        }
        Ok(())
    }

    /// Removes every registered task matching `status` with no `claimer_id`
    /// set, and, if `only_auto_cleanup` is set, whose `auto_cleanup` flag is
    /// also enabled. Returns the number removed. Intended for reclaiming
    /// terminal tasks; does not touch non-terminal ones beyond what `remove`
    /// already refuses.
    pub fn clear_by_status(&self, status: TaskStatus, only_auto_cleanup: bool) -> usize {
        let ids: Vec<TaskId> = lock(&self.tasks)
            .iter_in_order()
            .filter(|task| task.status() == status)
            .filter(|task| task.claimer_id().is_none() && (!only_auto_cleanup || task.auto_cleanup()))
            .map(|task| task.id().clone())
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.remove(&id, false).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    // -- queries (SPEC_FULL §11) --

    /// All tasks matching `filter`, in registration order.
    #[must_use]
    pub fn tasks_matching(&self, filter: &TaskFilter) -> Vec<Arc<Task>> {
        lock(&self.tasks)
            .iter_in_order()
            .filter(|task| filter.status.is_none_or(|status| task.status() == status))
            .filter(|task| {
                filter
                    .category
                    .as_ref()
                    .is_none_or(|category| &task.category() == category)
            })
            .filter(|task| filter.min_priority.is_none_or(|min| task.priority() >= min))
            .filter(|task| filter.max_priority.is_none_or(|max| task.priority() <= max))
            .filter(|task| {
                filter.tags.is_empty() || {
                    let tags = task.tags();
                    filter.tags.iter().any(|tag| tags.contains(tag))
                }
            })
            .filter(|task| {
                filter
                    .claimer_id
                    .as_ref()
                    .is_none_or(|id| task.claimer_id().as_ref() == Some(id))
            })
            .cloned()
            .collect()
    }

    /// Convenience wrapper: tasks in a given status.
    #[must_use]
    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Arc<Task>> {
        self.tasks_matching(&TaskFilter {
            status: Some(status),
            ..Default::default()
        })
    }

    /// Convenience wrapper: tasks in a given category.
    #[must_use]
    pub fn tasks_by_category(&self, category: impl Into<String>) -> Vec<Arc<Task>> {
        self.tasks_matching(&TaskFilter {
            category: Some(category.into()),
            ..Default::default()
        })
    }

    /// Convenience wrapper: tasks with priority in `[min, max]`.
    #[must_use]
    pub fn tasks_by_priority(&self, min: u8, max: u8) -> Vec<Arc<Task>> {
        self.tasks_matching(&TaskFilter {
            min_priority: Some(min),
            max_priority: Some(max),
            ..Default::default()
        })
    }

    /// Total registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Count of registered tasks in a given status.
    #[must_use]
    pub fn task_count_by_status(&self, status: TaskStatus) -> usize {
        lock(&self.tasks)
            .iter_in_order()
            .filter(|task| task.status() == status)
            .count()
    }

    /// Point-in-time statistics across the registry.
    #[must_use]
    pub fn get_statistics(&self) -> PlatformStatistics {
        let registry = lock(&self.tasks);
        let mut by_status: HashMap<TaskStatus, usize> = HashMap::new();
        for task in registry.iter_in_order() {
            *by_status.entry(task.status()).or_insert(0) += 1;
        }
        PlatformStatistics {
            total_tasks: registry.len(),
            by_status,
            claimer_count: lock(&self.claimers).len(),
        }
    }

    // -- claimer registry --

    /// Registers a claimer, attaching this platform to it so its
    /// `claim_next`/`claim_matching`/`claim_to_capacity` convenience
    /// methods can find it.
    pub fn register_claimer(&self, claimer: Arc<Claimer>) {
        claimer.set_platform(&self.arc());
        let id = claimer.id().to_string();
        lock(&self.claimers).insert(id.clone(), claimer);
        tracing::info!(claimer = %id, "claimer registered");
        self.events.emit(&PlatformEvent::ClaimerRegistered(id));
    }

    /// Removes a claimer from the registry. Does not touch tasks it
    /// currently holds. Returns `true` iff a claimer with that id existed.
    pub fn unregister_claimer(&self, id: &str) -> bool {
        let removed = lock(&self.claimers).remove(id).is_some();
        if removed {
            tracing::info!(claimer = id, "claimer unregistered");
            self.events.emit(&PlatformEvent::ClaimerUnregistered(id.to_string()));
        }
        removed
    }

    /// Looks up a claimer by id.
    #[must_use]
    pub fn get_claimer(&self, id: &str) -> Option<Arc<Claimer>> {
        lock(&self.claimers).get(id).cloned()
    }

    /// True iff a claimer with this id is registered.
    #[must_use]
    pub fn has_claimer(&self, id: &str) -> bool {
        lock(&self.claimers).contains_key(id)
    }

    /// All registered claimers.
    #[must_use]
    pub fn claimers(&self) -> Vec<Arc<Claimer>> {
        lock(&self.claimers).values().cloned().collect()
    }

    /// Number of registered claimers.
    #[must_use]
    pub fn claimer_count(&self) -> usize {
        lock(&self.claimers).len()
    }

    // -- claiming (spec §4.3) --

    /// Claims a specific task by id for `claimer`. The platform's own
    /// status/authorization/category checks here are advisory; `Task::
    /// try_claim`'s CAS, invoked via `Claimer::claim`, is the actual
    /// linearization point.
    pub fn claim(&self, claimer: &Arc<Claimer>, task_id: &TaskId) -> Result<Arc<Task>> {
        let task = self.get(task_id).ok_or(Error::TaskNotFound)?;
        if task.status() != TaskStatus::Published {
            return Err(Error::TaskStatusInvalid);
        }
        if !task.is_claimer_allowed(claimer.id()) {
            return Err(Error::ClaimerNotAllowed);
        }
        let category = task.category();
        if !category.is_empty() && !claimer.categories().contains(&category) {
            return Err(Error::TaskCategoryMismatch);
        }

        claimer.claim(&task)?;
        tracing::info!(task = %task_id, claimer = claimer.id(), "task claimed");
        self.events.emit(&PlatformEvent::TaskClaimed(task_id.clone()));
        Ok(task)
    }

    fn eligible_published(&self, claimer: &Claimer) -> Vec<Arc<Task>> {
        lock(&self.tasks)
            .iter_in_order()
            .filter(|task| task.status() == TaskStatus::Published)
            .filter(|task| task.is_claimer_allowed(claimer.id()))
            .filter(|task| {
                let category = task.category();
                category.is_empty() || claimer.categories().contains(&category)
            })
            .cloned()
            .collect()
    }

    /// Claims the highest-priority eligible `Published` task. Ties break
    /// toward the task published earliest (registration order).
    pub fn claim_next(&self, claimer: &Arc<Claimer>) -> Result<Arc<Task>> {
        let candidates = self.eligible_published(claimer);
        let best = candidates
            .into_iter()
            .fold(None::<Arc<Task>>, |best, task| match &best {
                Some(current) if current.priority() >= task.priority() => best,
                _ => Some(task),
            });
        match best {
            Some(task) => self.claim(claimer, task.id()),
            None => Err(Error::PlatformNoAvailableTask),
        }
    }

    /// Claims the best-affinity eligible `Published` task, per
    /// `Claimer::calculate_match_score`. Ties break toward higher priority,
    /// then toward registration order.
    pub fn claim_matching(&self, claimer: &Arc<Claimer>) -> Result<Arc<Task>> {
        let candidates = self.eligible_published(claimer);
        let best = candidates.into_iter().fold(None::<(u32, Arc<Task>)>, |best, task| {
            let score = claimer.calculate_match_score(&task);
            match &best {
                Some((best_score, best_task))
                    if *best_score > score || (*best_score == score && best_task.priority() >= task.priority()) =>
                {
                    best
                }
                _ => Some((score, task)),
            }
        });
        match best {
            Some((_, task)) => self.claim(claimer, task.id()),
            None => Err(Error::PlatformNoAvailableTask),
        }
    }

    /// Repeatedly calls `claim_matching` for `claimer` until its capacity
    /// is exhausted or no eligible task remains.
    pub fn claim_to_capacity(&self, claimer: &Arc<Claimer>) -> Vec<Arc<Task>> {
        let mut claimed = Vec::new();
        while claimer.can_claim_more() {
            match self.claim_matching(claimer) {
                Ok(task) => claimed.push(task),
                Err(_) => break,
            }
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TaskResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn published_task(title: &str, priority: i32) -> Arc<Task> {
        let task = Arc::new(Task::new(title));
        task.set_priority(priority);
        task.publish().unwrap();
        task
    }

    #[test]
    fn publish_then_claim_next_prefers_highest_priority() {
        let platform = Platform::new(PlatformConfig::default());
        platform.publish(published_task("low", 10)).unwrap();
        let high = published_task("high", 90);
        platform.publish(high.clone()).unwrap();

        let claimer = Claimer::new("c1", "worker", 5);
        platform.register_claimer(claimer.clone());

        let claimed = platform.claim_next(&claimer).unwrap();
        assert_eq!(claimed.id(), high.id());
    }

    #[test]
    fn queue_full_rejects_publish() {
        let platform = Platform::new(PlatformConfig { max_queue_size: 1 });
        platform.publish(published_task("a", 0)).unwrap();
        let err = platform.publish(published_task("b", 0)).unwrap_err();
        assert_eq!(err, Error::PlatformQueueFull);
    }

    #[test]
    fn force_remove_abandons_held_task() {
        let platform = Platform::new(PlatformConfig::default());
        let task = published_task("a", 0);
        platform.publish(task.clone()).unwrap();

        let claimer = Claimer::new("c1", "worker", 5);
        platform.register_claimer(claimer.clone());
        platform.claim(&claimer, task.id()).unwrap();

        assert_eq!(platform.remove(task.id(), false).unwrap_err(), Error::TaskInvalidState);
        platform.remove(task.id(), true).unwrap();

        assert!(!platform.has(task.id()));
        assert!(!claimer.has_task(task.id()));
        assert_eq!(task.status(), TaskStatus::Abandoned);
    }

    #[test]
    fn claim_next_is_exclusive_under_concurrency() {
        let platform = Platform::new(PlatformConfig::default());
        platform.publish(published_task("only", 50)).unwrap();

        let wins = Arc::new(AtomicUsize::new(0));
        thread::scope(|scope| {
            for n in 0..10 {
                let platform = &platform;
                let wins = wins.clone();
                scope.spawn(move || {
                    let claimer = Claimer::new(format!("c{n}"), "worker", 5);
                    platform.register_claimer(claimer.clone());
                    if platform.claim_next(&claimer).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_by_status_removes_matching_terminal_tasks() {
        let platform = Platform::new(PlatformConfig::default());
        let task = published_task("a", 0);
        platform.publish(task.clone()).unwrap();
        task.cancel().unwrap();

        let removed = platform.clear_by_status(TaskStatus::Cancelled, false);
        assert_eq!(removed, 1);
        assert!(!platform.has(task.id()));
    }

    #[test]
    fn cancel_requests_cooperative_cancel_once_claimed() {
        let platform = Platform::new(PlatformConfig::default());
        let task = published_task("a", 0);
        platform.publish(task.clone()).unwrap();

        let claimer = Claimer::new("c1", "worker", 5);
        platform.register_claimer(claimer.clone());
        platform.claim(&claimer, task.id()).unwrap();

        platform.cancel(task.id()).unwrap();
        assert!(task.is_cancel_requested());
        assert_eq!(task.status(), TaskStatus::Claimed);
    }

    #[test]
    fn full_claim_run_complete_updates_statistics() {
        let platform = Platform::new(PlatformConfig::default());
        let task = Arc::new(Task::new("t"));
        task.set_handler(Box::new(|_task, _input| Ok(TaskResult::ok("done", "42"))));
        platform.publish(task.clone()).unwrap();

        let claimer = Claimer::new("c1", "worker", 5);
        platform.register_claimer(claimer.clone());
        platform.claim(&claimer, task.id()).unwrap();
        let result = claimer.run(&task, "input");

        assert!(result.is_ok());
        assert_eq!(task.status(), TaskStatus::Completed);
        let stats = platform.get_statistics();
        assert_eq!(stats.by_status.get(&TaskStatus::Completed), Some(&1));
    }
}

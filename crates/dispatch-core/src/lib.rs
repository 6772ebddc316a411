//! An in-process task dispatch platform.
//!
//! Three cooperating components, synchronous and thread-safe, meant to be
//! embedded directly inside a host program rather than run as a service:
//!
//! - [`Task`] — a cancellable unit of work with a CAS-driven lifecycle.
//! - [`Claimer`] — a concurrency-bounded worker identity that claims and
//!   runs tasks.
//! - [`Platform`] — the shared registry mediating between tasks and
//!   claimers.
//!
//! No persistence, no network I/O, no async runtime: every operation here
//! runs to completion on the calling thread, synchronized with
//! `std::sync` primitives and lock-free atomics at the hot paths.

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

mod claimer;
mod error;
mod events;
mod platform;
mod priority;
mod result;
mod task;

pub use claimer::{Claimer, ClaimerEvent, ClaimerStatus};
pub use error::{Error, Result};
pub use events::{Emitter, ScopedSubscription, SubscriptionId};
pub use platform::{Platform, PlatformConfig, PlatformEvent, PlatformStatistics, TaskFilter};
pub use result::TaskResult;
pub use task::{Task, TaskEvent, TaskHandler, TaskId, TaskStatus};

/// Named priority thresholds and clamping (spec §3's `priority` field).
pub mod priority_levels {
    pub use crate::priority::*;
}

use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, recovering from poisoning instead of panicking.
///
/// The core never panics while holding a lock (spec §7), so poisoning here
/// would only ever be caused by a bug in a caller-supplied handler running
/// on a borrowed thread. Recovering the inner state deterministically is
/// preferable to turning that bug into a second panic somewhere unrelated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current time formatted as `YYYY-MM-DDThh:mm:ssZ`.
pub(crate) fn now_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

//! Accounting of live workers and pending retry timers
//!
//! The batch coordinator needs more than an empty queue to call a batch
//! done: workers may still be executing ids they already dequeued, and a
//! task waiting out its backoff is not in the queue at all. Both are
//! counted here, and [`ActivityTracker::wait_idle`] resolves once both
//! counts are zero.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Activity {
    workers: usize,
    pending_retries: usize,
}

impl Activity {
    fn is_idle(&self) -> bool {
        self.workers == 0 && self.pending_retries == 0
    }
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Worker,
    PendingRetry,
}

/// Shared counter of engine activity
#[derive(Clone, Debug)]
pub struct ActivityTracker {
    state: Arc<watch::Sender<Activity>>,
}

/// Keeps one unit of activity alive until dropped
#[derive(Debug)]
pub struct ActivityGuard {
    state: Arc<watch::Sender<Activity>>,
    slot: Slot,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.state.send_modify(|activity| match self.slot {
            Slot::Worker => activity.workers = activity.workers.saturating_sub(1),
            Slot::PendingRetry => {
                activity.pending_retries = activity.pending_retries.saturating_sub(1)
            }
        });
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Tracker with nothing in flight
    pub fn new() -> Self {
        let (state, _) = watch::channel(Activity::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Reserve a worker slot if fewer than `max_workers` are live
    pub fn try_enter_worker(&self, max_workers: usize) -> Option<ActivityGuard> {
        let reserved = self.state.send_if_modified(|activity| {
            if activity.workers < max_workers {
                activity.workers += 1;
                true
            } else {
                false
            }
        });

        reserved.then(|| ActivityGuard {
            state: self.state.clone(),
            slot: Slot::Worker,
        })
    }

    /// Count a retry timer until the guard is dropped
    pub fn enter_pending_retry(&self) -> ActivityGuard {
        self.state
            .send_modify(|activity| activity.pending_retries += 1);
        ActivityGuard {
            state: self.state.clone(),
            slot: Slot::PendingRetry,
        }
    }

    /// Workers currently alive
    pub fn live_workers(&self) -> usize {
        self.state.borrow().workers
    }

    /// Retry timers that have not fired or been cancelled yet
    pub fn pending_retries(&self) -> usize {
        self.state.borrow().pending_retries
    }

    /// Resolve once no worker is alive and no retry is pending
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(Activity::is_idle).await;
    }
}

//! Worker Pool: concurrent executors draining the Ready Queue

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;

use super::activity::{ActivityGuard, ActivityTracker};
use super::admission::AdmissionController;
use super::queue::ReadyQueue;
use super::retry_scheduler::RetryScheduler;
use super::store::TaskStore;
use super::AcquisitionCallback;
use crate::retry::TaskFailure;
use crate::types::{RunOutcome, TaskId, TaskStatus};

/// Pool of workers that run queued tasks through the acquisition callback
///
/// The number of live workers is topped up to `max_workers` whenever
/// processing is triggered. Each worker additionally holds an admission
/// permit while the callback runs; the permit pool is shared with
/// `Orchestrator::run_one`, which is what keeps single-task runs inside the
/// same concurrency budget as batch runs.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    store: TaskStore,
    queue: ReadyQueue,
    admission: AdmissionController,
    activity: ActivityTracker,
    retries: RetryScheduler,
    callback: Arc<dyn AcquisitionCallback>,
    max_workers: usize,
    poll_interval: Duration,
}

/// Collaborators a [`WorkerPool`] is built from
pub struct WorkerPoolParts {
    /// Task records
    pub store: TaskStore,
    /// Ids awaiting execution
    pub queue: ReadyQueue,
    /// Concurrency budget
    pub admission: AdmissionController,
    /// Live-worker accounting
    pub activity: ActivityTracker,
    /// Retry decision and timers
    pub retries: RetryScheduler,
    /// The work itself
    pub callback: Arc<dyn AcquisitionCallback>,
}

impl WorkerPool {
    /// Build a pool of up to `max_workers` workers
    ///
    /// `poll_interval` is how long a worker backs off when every admission
    /// permit is taken.
    pub fn new(parts: WorkerPoolParts, max_workers: usize, poll_interval: Duration) -> Self {
        let WorkerPoolParts {
            store,
            queue,
            admission,
            activity,
            retries,
            callback,
        } = parts;

        Self {
            inner: Arc::new(PoolInner {
                store,
                queue,
                admission,
                activity,
                retries,
                callback,
                max_workers,
                poll_interval,
            }),
        }
    }

    /// Spawn workers until `max_workers` are alive
    ///
    /// Returns how many were spawned. Safe to call repeatedly; a pool that
    /// is already at full strength spawns nothing, and a closed pool never
    /// spawns.
    pub fn start_batch_processing(&self) -> usize {
        if self.inner.admission.is_closed() {
            return 0;
        }

        let mut spawned = 0;
        while let Some(guard) = self.inner.activity.try_enter_worker(self.inner.max_workers) {
            tokio::spawn(self.clone().run_worker(guard));
            spawned += 1;
        }

        if spawned > 0 {
            tracing::debug!(
                spawned,
                live_workers = self.inner.activity.live_workers(),
                "Started workers"
            );
        }
        spawned
    }

    /// Whether the admission pool has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.admission.is_closed()
    }

    async fn run_worker(self, guard: ActivityGuard) {
        loop {
            if self.inner.queue.is_empty().await {
                break;
            }

            let permit = match self.inner.admission.try_acquire() {
                Ok(Some(permit)) => permit,
                Ok(None) => {
                    tokio::time::sleep(self.inner.poll_interval).await;
                    continue;
                }
                Err(_) => {
                    tracing::debug!("Admission closed, worker exiting");
                    break;
                }
            };

            let Some(task_id) = self.inner.queue.dequeue().await else {
                permit.release();
                break;
            };

            self.execute(&task_id).await;
            permit.release();
        }

        self.retire_worker(guard).await;
    }

    /// Give up a worker slot, then top the pool up again if ids arrived
    /// after the worker last saw an empty queue
    pub(super) async fn retire_worker(&self, guard: ActivityGuard) {
        drop(guard);
        if !self.inner.queue.is_empty().await {
            self.start_batch_processing();
        }
    }

    /// Run one task through the callback and settle its status
    ///
    /// The caller must hold an admission permit. Callback errors and panics
    /// are turned into a retry decision here and never propagate.
    pub(crate) async fn execute(&self, task_id: &TaskId) -> RunOutcome {
        let started = self
            .inner
            .store
            .update(task_id, |task| {
                task.transition_to(TaskStatus::Running)?;
                let now = Utc::now();
                task.start_time = Some(now);
                if task.original_start_time.is_none() {
                    task.original_start_time = Some(now);
                }
                task.end_time = None;
                Ok(())
            })
            .await;

        if let Err(e) = started {
            tracing::warn!(task_id = %task_id, error = %e, "Task could not be started");
            return RunOutcome::Error {
                task_id: Some(task_id.clone()),
                error_type: Some(e.kind().to_string()),
                message: e.to_string(),
            };
        }

        tracing::info!(task_id = %task_id, "Task started");

        let outcome = AssertUnwindSafe(self.inner.callback.execute(task_id))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(result)) => return self.complete(task_id, result).await,
            Ok(Err(e)) => TaskFailure::from(e),
            Err(panic) => TaskFailure::from_panic(panic),
        };

        tracing::warn!(
            task_id = %task_id,
            kind = failure.kind(),
            error = %failure,
            "Task failed"
        );

        self.inner.retries.decide(&failure, task_id, self).await.into()
    }

    async fn complete(&self, task_id: &TaskId, result: serde_json::Value) -> RunOutcome {
        let stored = result.clone();
        let settled = self
            .inner
            .store
            .update(task_id, move |task| {
                task.transition_to(TaskStatus::Completed)?;
                task.result = Some(stored);
                task.end_time = Some(Utc::now());
                Ok(task.total_execution_time())
            })
            .await;

        match settled {
            Ok(elapsed) => {
                tracing::info!(
                    task_id = %task_id,
                    total_execution_time = elapsed,
                    "Task completed"
                );
                RunOutcome::Success {
                    task_id: task_id.clone(),
                    result,
                }
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Could not record task success");
                RunOutcome::Error {
                    task_id: Some(task_id.clone()),
                    error_type: Some(e.kind().to_string()),
                    message: e.to_string(),
                }
            }
        }
    }
}

//! Retry Scheduler: backoff-delayed re-admission of failed tasks

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::activity::ActivityTracker;
use super::queue::ReadyQueue;
use super::store::TaskStore;
use super::worker_pool::WorkerPool;
use crate::config::RetryConfig;
use crate::retry::{IsRetryable, TaskFailure};
use crate::types::{RetryDecision, TaskId, TaskStatus};

/// Owns the retry decision for failed tasks and the timers that re-queue them
///
/// Every failure path (worker, `run_one`, `classify_and_maybe_retry`) goes
/// through [`decide`](Self::decide), so `retry_count` and the
/// `running -> retrying | failed` edge are only ever touched here.
#[derive(Clone)]
pub struct RetryScheduler {
    policy: Arc<RetryConfig>,
    store: TaskStore,
    queue: ReadyQueue,
    activity: ActivityTracker,
    shutdown: CancellationToken,
}

enum Verdict {
    Retry(Duration),
    Fail,
    Unchanged,
}

impl RetryScheduler {
    /// Create a scheduler applying `policy`
    pub fn new(
        policy: RetryConfig,
        store: TaskStore,
        queue: ReadyQueue,
        activity: ActivityTracker,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            queue,
            activity,
            shutdown: CancellationToken::new(),
        }
    }

    /// The retry policy in force
    pub fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    /// Settle a failed attempt of `task_id`
    ///
    /// A `running` task whose failure kind is on the allow-list and that has
    /// been retried fewer than `max_attempts` times moves to `retrying` and
    /// gets a timer; any other `running` task becomes terminally `failed`.
    /// Tasks in other states are reported but left as they are.
    pub async fn decide(
        &self,
        failure: &TaskFailure,
        task_id: &TaskId,
        pool: &WorkerPool,
    ) -> RetryDecision {
        let retryable = failure.is_retryable(&self.policy);
        let policy = self.policy.clone();
        let message = failure.message().to_string();

        let verdict = self
            .store
            .update(task_id, |task| {
                if task.status != TaskStatus::Running {
                    return Ok(Verdict::Unchanged);
                }

                let now = Utc::now();
                let verdict = if retryable && task.retry_count < policy.max_attempts {
                    let delay = policy.backoff_delay(task.retry_count);
                    task.transition_to(TaskStatus::Retrying)?;
                    task.retry_count += 1;
                    Verdict::Retry(delay)
                } else {
                    task.transition_to(TaskStatus::Failed)?;
                    Verdict::Fail
                };
                task.last_error = Some(message.clone());
                task.end_time = Some(now);
                Ok(verdict)
            })
            .await;

        match verdict {
            Ok(Verdict::Retry(delay)) => {
                tracing::info!(
                    task_id = %task_id,
                    kind = failure.kind(),
                    retry_in_ms = delay.as_millis(),
                    "Scheduling retry"
                );
                self.schedule(task_id.clone(), delay, pool.clone());
                RetryDecision::Retrying {
                    task_id: task_id.clone(),
                    retry_in_seconds: delay.as_secs_f64(),
                }
            }
            Ok(Verdict::Fail) => {
                tracing::error!(
                    task_id = %task_id,
                    kind = failure.kind(),
                    retryable,
                    error = %failure,
                    "Task failed permanently"
                );
                self.terminal(failure, Some(task_id))
            }
            Ok(Verdict::Unchanged) => {
                tracing::debug!(task_id = %task_id, "Task is not running, no retry decision taken");
                self.terminal(failure, Some(task_id))
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Retry decision skipped");
                self.terminal(failure, Some(task_id))
            }
        }
    }

    /// Terminal outcome carrying the failure's kind and message
    pub fn terminal(&self, failure: &TaskFailure, task_id: Option<&TaskId>) -> RetryDecision {
        RetryDecision::Error {
            error_type: failure.kind().to_string(),
            error_message: failure.message().to_string(),
            task_id: task_id.cloned(),
        }
    }

    /// Drop every timer that has not fired yet
    ///
    /// Tasks whose timer is cancelled stay in `retrying`.
    pub fn cancel_pending(&self) {
        self.shutdown.cancel();
    }

    fn schedule(&self, task_id: TaskId, delay: Duration, pool: WorkerPool) {
        let guard = self.activity.enter_pending_retry();
        let this = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = this.shutdown.cancelled() => {
                    tracing::debug!(task_id = %task_id, "Pending retry cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    this.requeue(&task_id, &pool).await;
                }
            }
            drop(guard);
        });
    }

    async fn requeue(&self, task_id: &TaskId, pool: &WorkerPool) {
        let requeued = self
            .store
            .update(task_id, |task| {
                if task.status != TaskStatus::Retrying {
                    return Ok(false);
                }
                task.transition_to(TaskStatus::Initialized)?;
                task.start_time = None;
                Ok(true)
            })
            .await;

        match requeued {
            Ok(true) => {
                self.queue.enqueue(task_id.clone()).await;
                pool.start_batch_processing();
                tracing::info!(task_id = %task_id, "Task re-queued for retry");
            }
            Ok(false) => {
                tracing::debug!(task_id = %task_id, "Task status changed, retry dropped");
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Could not re-queue task");
            }
        }
    }
}

//! Acquisition Orchestrator: the public face of the scheduling engine

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Error;
use crate::retry::TaskFailure;
use crate::scheduler::{
    AcquisitionCallback, ActivityTracker, AdmissionController, BatchCoordinator, ReadyQueue,
    RetryScheduler, TaskStore, WorkerPool, WorkerPoolParts,
};
use crate::types::{
    BatchDescriptor, BatchSummary, RetryDecision, RunOutcome, StatusReport, Task,
    TaskDefinition, TaskDescriptor, TaskId, TaskParameters, TaskStatus, TaskStatusReport,
};

/// Creates tasks, runs them, and reports on them
///
/// None of the operations return `Err`: failures surface as a status plus a
/// message in the returned value.
#[derive(Clone)]
pub struct Orchestrator {
    store: TaskStore,
    queue: ReadyQueue,
    admission: AdmissionController,
    retries: RetryScheduler,
    pool: WorkerPool,
    batches: BatchCoordinator,
    batch_timeout: Duration,
}

impl Orchestrator {
    /// Wire the engine around `store` and `callback`
    ///
    /// The callback usually holds a clone of the same `store`, to read task
    /// parameters by id.
    pub fn new(config: &Config, store: TaskStore, callback: Arc<dyn AcquisitionCallback>) -> Self {
        let queue = ReadyQueue::new();
        let activity = ActivityTracker::new();
        let admission = AdmissionController::new(config.task.max_concurrent_tasks);
        let retries = RetryScheduler::new(
            config.retry.clone(),
            store.clone(),
            queue.clone(),
            activity.clone(),
        );
        let pool = WorkerPool::new(
            WorkerPoolParts {
                store: store.clone(),
                queue: queue.clone(),
                admission: admission.clone(),
                activity: activity.clone(),
                retries: retries.clone(),
                callback,
            },
            config.task.max_concurrent_tasks,
            config.task.poll_interval,
        );
        let batches = BatchCoordinator::new(store.clone(), queue.clone(), activity, pool.clone());

        Self {
            store,
            queue,
            admission,
            retries,
            pool,
            batches,
            batch_timeout: config.batch_timeout(),
        }
    }

    /// The task store shared with the callback
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// The admission pool shared by workers and `run_one`
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Register and enqueue one task
    pub async fn create_task(&self, parameters: TaskParameters) -> TaskDescriptor {
        self.create_task_from(TaskDefinition {
            name: None,
            api_params: parameters,
        })
        .await
    }

    /// Register and enqueue one named task
    pub async fn create_task_from(&self, definition: TaskDefinition) -> TaskDescriptor {
        let mut task = Task::new(definition.api_params);
        task.name = definition.name;
        let created_time = task.created_time;

        let task_id = self.store.register(task).await;
        self.queue.enqueue(task_id.clone()).await;
        tracing::debug!(task_id = %task_id, "Task created");

        TaskDescriptor {
            task_id,
            status: TaskStatus::Initialized,
            created_time,
        }
    }

    /// Run one task now, in the caller's context
    ///
    /// With `None`, the next ready task is taken from the queue. With an id,
    /// that task is pulled out of the queue and run, provided it is
    /// `initialized`. The task is chosen before waiting for an admission
    /// permit, so having nothing to run is reported at once even while
    /// every permit is taken. The permit is held for the duration.
    pub async fn run_one(&self, task_id: Option<&TaskId>) -> RunOutcome {
        if self.admission.is_closed() {
            return RunOutcome::error(Error::ShuttingDown.to_string());
        }

        let task_id = match task_id {
            Some(id) => match self.store.get(id).await {
                None => return RunOutcome::error(format!("task {id} not found")),
                Some(task) if task.status != TaskStatus::Initialized => {
                    return RunOutcome::Error {
                        task_id: Some(id.clone()),
                        error_type: None,
                        message: format!("task {id} is {}, not ready to run", task.status),
                    };
                }
                Some(_) => {
                    self.queue.remove(id).await;
                    id.clone()
                }
            },
            None => match self.queue.dequeue().await {
                Some(id) => id,
                None => return RunOutcome::error("no task is ready to run"),
            },
        };

        let permit = match self.admission.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                self.queue.push_front(task_id).await;
                return RunOutcome::error(e.to_string());
            }
        };

        let outcome = self.pool.execute(&task_id).await;
        permit.release();
        outcome
    }

    /// Submit a set of tasks and wait for them, up to the configured timeout
    pub async fn run_batch(&self, definitions: Vec<TaskDefinition>) -> BatchSummary {
        let batch = self.submit_batch(definitions).await;
        self.await_batch(&batch, self.batch_timeout).await
    }

    /// Submit a set of tasks without waiting
    pub async fn submit_batch(&self, definitions: Vec<TaskDefinition>) -> BatchDescriptor {
        self.batches.submit_batch(definitions).await
    }

    /// Wait for a submitted batch, up to `timeout`
    pub async fn await_batch(&self, batch: &BatchDescriptor, timeout: Duration) -> BatchSummary {
        self.batches.await_batch(batch, timeout).await
    }

    /// Current state of a task
    pub async fn status(&self, task_id: &TaskId) -> StatusReport {
        match self.store.get(task_id).await {
            Some(task) => StatusReport::Task(TaskStatusReport::from(&task)),
            None => StatusReport::not_found(task_id),
        }
    }

    /// Apply the retry policy to `error` reported for `task_id`
    ///
    /// Only a `running` task can be moved to `retrying` or `failed`; for any
    /// other task, or without an id, the error is reported back unchanged.
    pub async fn classify_and_maybe_retry(
        &self,
        error: &Error,
        task_id: Option<&TaskId>,
    ) -> RetryDecision {
        let failure = TaskFailure::from(error);
        match task_id {
            Some(id) => self.retries.decide(&failure, id, &self.pool).await,
            None => self.retries.terminal(&failure, None),
        }
    }

    /// Stop scheduling work
    ///
    /// Pending retry timers are cancelled, leaving their tasks `retrying`,
    /// and the admission pool is closed so idle workers exit. Callbacks that
    /// are already running finish normally.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.retries.cancel_pending();
        self.admission.close();
    }
}

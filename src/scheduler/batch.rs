//! Batch Coordinator: submit a set of tasks and wait for them together

use std::time::Duration;

use tokio::time::Instant;

use super::activity::ActivityTracker;
use super::queue::ReadyQueue;
use super::store::TaskStore;
use super::worker_pool::WorkerPool;
use crate::types::{BatchDescriptor, BatchId, BatchSummary, BatchTaskEntry, Task, TaskDefinition};

/// Registers batches and aggregates their outcome
#[derive(Clone)]
pub struct BatchCoordinator {
    store: TaskStore,
    queue: ReadyQueue,
    activity: ActivityTracker,
    pool: WorkerPool,
}

impl BatchCoordinator {
    /// Create a coordinator over the shared engine components
    pub fn new(
        store: TaskStore,
        queue: ReadyQueue,
        activity: ActivityTracker,
        pool: WorkerPool,
    ) -> Self {
        Self {
            store,
            queue,
            activity,
            pool,
        }
    }

    /// Register and enqueue one task per definition, then start the pool
    ///
    /// Returns immediately; use [`await_batch`](Self::await_batch) to wait.
    pub async fn submit_batch(&self, definitions: Vec<TaskDefinition>) -> BatchDescriptor {
        let batch_id = BatchId::new();
        let mut task_ids = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let mut task = Task::new(definition.api_params);
            task.name = definition.name;
            let id = self.store.register(task).await;
            self.queue.enqueue(id.clone()).await;
            task_ids.push(id);
        }

        let workers = self.pool.start_batch_processing();
        tracing::info!(
            batch_id = %batch_id,
            total_tasks = task_ids.len(),
            workers,
            "Batch submitted"
        );

        BatchDescriptor { batch_id, task_ids }
    }

    /// Wait for the engine to drain, at most `timeout`, and summarize
    ///
    /// Drained means the ready queue is empty, no worker is alive and no
    /// retry timer is pending. Hitting the timeout only stops the wait;
    /// running callbacks carry on.
    pub async fn await_batch(&self, batch: &BatchDescriptor, timeout: Duration) -> BatchSummary {
        let started = Instant::now();
        let drained = tokio::time::timeout(timeout, self.wait_for_drain())
            .await
            .is_ok();
        let elapsed_time = started.elapsed().as_secs_f64();

        let tasks = self.store.snapshot(&batch.task_ids).await;
        let completed_tasks = tasks
            .values()
            .filter(|task| task.status.is_terminal())
            .count();
        let total_tasks = batch.task_ids.len();
        let timeout = completed_tasks < total_tasks;

        if timeout {
            tracing::warn!(
                batch_id = %batch.batch_id,
                completed_tasks,
                total_tasks,
                drained,
                "Batch did not finish in time"
            );
        } else {
            tracing::info!(
                batch_id = %batch.batch_id,
                completed_tasks,
                elapsed_time,
                "Batch finished"
            );
        }

        BatchSummary {
            batch_id: batch.batch_id.clone(),
            total_tasks,
            elapsed_time,
            tasks: tasks
                .iter()
                .map(|(id, task)| (id.clone(), BatchTaskEntry::from(task)))
                .collect(),
            completed_tasks,
            timeout,
        }
    }

    async fn wait_for_drain(&self) {
        loop {
            self.activity.wait_idle().await;
            if self.queue.is_empty().await || self.pool.is_closed() {
                return;
            }
            // Ids were queued without a pool run (e.g. via create_task)
            self.pool.start_batch_processing();
        }
    }
}

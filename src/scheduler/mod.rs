//! Task scheduling and execution engine
//!
//! The engine is built from small shared components, each cheap to clone:
//!
//! - [`TaskStore`] owns every [`Task`](crate::types::Task) record
//! - [`ReadyQueue`] holds ids waiting to run, first in first out
//! - [`AdmissionController`] bounds how many callbacks execute at once
//! - [`WorkerPool`] drains the queue through an [`AcquisitionCallback`]
//! - [`RetryScheduler`] decides retries and re-queues tasks after a backoff
//! - [`BatchCoordinator`] submits task sets and waits for them to settle
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use fare_crawler::scheduler::AcquisitionCallback;
//! use fare_crawler::{Config, Orchestrator, TaskDefinition, TaskId, TaskStore};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl AcquisitionCallback for Echo {
//!     async fn execute(&self, task_id: &TaskId) -> fare_crawler::Result<serde_json::Value> {
//!         Ok(serde_json::json!({ "task": task_id.as_str() }))
//!     }
//! }
//!
//! # async fn example() {
//! let orchestrator = Orchestrator::new(&Config::default(), TaskStore::new(), Arc::new(Echo));
//! let summary = orchestrator
//!     .run_batch(vec![TaskDefinition::default(), TaskDefinition::default()])
//!     .await;
//! assert_eq!(summary.total_tasks, 2);
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::TaskId;

mod activity;
mod admission;
mod batch;
mod queue;
mod retry_scheduler;
mod store;
mod worker_pool;

pub use activity::{ActivityGuard, ActivityTracker};
pub use admission::{AdmissionController, AdmissionPermit};
pub use batch::BatchCoordinator;
pub use queue::ReadyQueue;
pub use retry_scheduler::RetryScheduler;
pub use store::TaskStore;
pub use worker_pool::{WorkerPool, WorkerPoolParts};

/// The work a task stands for
///
/// Given a task id, the implementation looks up whatever it needs (usually
/// the parameters, via the [`TaskStore`]) and returns a result payload on
/// success. An `Err` is classified by [`Error::kind`](crate::Error::kind)
/// for the retry decision; a panic is caught and treated as a failure.
#[async_trait]
pub trait AcquisitionCallback: Send + Sync {
    /// Perform the acquisition for `task_id`
    async fn execute(&self, task_id: &TaskId) -> Result<Value>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

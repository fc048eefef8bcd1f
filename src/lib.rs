//! # fare-crawler
//!
//! Scheduled flight-fare acquisition with bounded concurrency and
//! exponential-backoff retry.
//!
//! ## Overview
//!
//! A batch of search tasks is submitted to the [`Orchestrator`]. Workers
//! drain the ready queue through an [`AcquisitionCallback`]; the production
//! callback is [`FarePipeline`], which fetches the search API, parses the
//! response into [`FareRecord`]s and persists them to a JSON blob and a
//! SQLite table. Failed tasks are classified and, when the error kind is in
//! the retry allow-list, re-queued after a backoff delay.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fare_crawler::{
//!     ApiClient, ApiParser, Config, FarePipeline, FareStore, Orchestrator, TaskStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_yaml("api:\n  base_url: https://travel.example.com\n")?;
//!
//!     let store = TaskStore::new();
//!     let pipeline = FarePipeline::new(
//!         store.clone(),
//!         Arc::new(ApiClient::new(&config.api)?),
//!         Arc::new(ApiParser),
//!         Arc::new(FareStore::open(&config.storage).await?),
//!     );
//!     let orchestrator = Orchestrator::new(&config, store, Arc::new(pipeline));
//!
//!     let summary = orchestrator.run_batch(config.planner.flight_tasks.clone()).await;
//!     println!("{}", serde_json::to_string_pretty(&summary)?);
//!
//!     orchestrator.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Facade over the scheduling engine
pub mod orchestrator;
/// Fetch, parse and persist stages of an acquisition
pub mod pipeline;
/// Task-list generators
pub mod planner;
/// Error classification and backoff
pub mod retry;
/// Task scheduling and execution engine
pub mod scheduler;
/// Fare persistence (JSON blobs and SQLite)
pub mod storage;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, Config, PlannerConfig, RetryConfig, StorageConfig, TaskConfig};
pub use error::{Error, Result, StorageError};
pub use orchestrator::Orchestrator;
pub use pipeline::{ApiClient, ApiParser, FarePipeline, Fetcher, Parser, PersistReport, Persister};
pub use planner::{HolidayCalendar, HttpHolidayCalendar};
pub use retry::{IsRetryable, TaskFailure};
pub use scheduler::{AcquisitionCallback, TaskStore};
pub use storage::{FareDatabase, FareStore};
pub use types::{
    BatchDescriptor, BatchId, BatchSummary, FareRecord, FlightSegment, RetryDecision, RunOutcome,
    StatusReport, Task, TaskDefinition, TaskDescriptor, TaskId, TaskParameters, TaskStatus,
};

/// Wait for a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// # async fn example(orchestrator: fare_crawler::Orchestrator) {
/// tokio::select! {
///     summary = orchestrator.run_batch(Vec::new()) => println!("{}", summary.completed_tasks),
///     _ = fare_crawler::shutdown_signal() => {}
/// }
/// orchestrator.shutdown();
/// # }
/// ```
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments
    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT, shutting down");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "SIGINT handler unavailable, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM, shutting down");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "No signal handlers registered, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Wait for a termination signal (Ctrl+C).
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

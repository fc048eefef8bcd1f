//! Fetch → parse → persist acquisition pipeline
//!
//! [`FarePipeline`] is the production [`AcquisitionCallback`]: it reads a
//! task's parameters from the [`TaskStore`], fetches the search response,
//! parses it into [`FareRecord`]s and hands them to the persister. Each
//! stage sits behind a trait so it can be replaced in tests.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::scheduler::{AcquisitionCallback, TaskStore};
use crate::types::{FareRecord, TaskId, TaskParameters};

mod client;
mod parser;

pub use client::ApiClient;
pub use parser::ApiParser;

/// Retrieves the raw search response for a parameter set
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the response document
    async fn fetch(&self, params: &TaskParameters) -> Result<Value>;
}

/// Turns a raw search response into fare records
pub trait Parser: Send + Sync {
    /// Parse the document, skipping malformed entries
    fn parse(&self, document: &Value) -> Result<Vec<FareRecord>>;
}

/// Where the sinks put a task's output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistReport {
    /// JSON blob holding the parsed records
    pub blob_path: PathBuf,
    /// Rows inserted into the fare table
    pub rows_written: u64,
    /// JSON blob holding the raw response, if it could be written
    pub raw_blob_path: Option<PathBuf>,
}

/// Writes parsed records (and the raw document) to storage
#[async_trait]
pub trait Persister: Send + Sync {
    /// Persist the output of one task
    ///
    /// Fails if either the blob or the table sink fails.
    async fn persist(
        &self,
        task_id: &TaskId,
        records: &[FareRecord],
        raw: &Value,
    ) -> Result<PersistReport>;
}

/// The acquisition callback wired from a fetcher, parser and persister
#[derive(Clone)]
pub struct FarePipeline {
    store: TaskStore,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser>,
    persister: Arc<dyn Persister>,
}

impl FarePipeline {
    /// Assemble a pipeline reading task parameters from `store`
    pub fn new(
        store: TaskStore,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn Parser>,
        persister: Arc<dyn Persister>,
    ) -> Self {
        Self {
            store,
            fetcher,
            parser,
            persister,
        }
    }
}

#[async_trait]
impl AcquisitionCallback for FarePipeline {
    async fn execute(&self, task_id: &TaskId) -> Result<Value> {
        let params = self
            .store
            .parameters(task_id)
            .await
            .filter(|params| !params.is_empty())
            .ok_or_else(|| Error::MissingParameters {
                task_id: task_id.to_string(),
            })?;

        let document = self.fetcher.fetch(&params).await?;
        let records = self.parser.parse(&document)?;
        let report = self.persister.persist(task_id, &records, &document).await?;

        tracing::info!(
            task_id = %task_id,
            fare_count = records.len(),
            rows_written = report.rows_written,
            "Fares acquired"
        );

        Ok(json!({
            "message": format!("Successfully processed {} flight infos.", records.len()),
            "fare_count": records.len(),
            "blob_path": report.blob_path.display().to_string(),
            "rows_written": report.rows_written,
        }))
    }
}

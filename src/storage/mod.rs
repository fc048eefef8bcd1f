//! Persistence for acquired fares
//!
//! [`FareStore`] is the production [`Persister`]. It writes to two sinks:
//! - a JSON blob per task under `storage.blob_dir` ([`BlobStore`])
//! - one row per fare in the SQLite `fares` table ([`FareDatabase`])
//!
//! The raw search response is also kept as a blob, on a best-effort basis.
//!
//! ## Submodules
//!
//! Methods on [`FareDatabase`] are organized by concern:
//! - `migrations`: database lifecycle and schema migrations
//! - `fares`: fare row inserts and queries

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::config::StorageConfig;
use crate::error::Result;
use crate::pipeline::{PersistReport, Persister};
use crate::types::{FareRecord, TaskId};

mod blobs;
mod fares;
mod migrations;

pub use blobs::BlobStore;
pub use fares::MAX_SEGMENTS_PER_DIRECTION;

/// SQLite-backed fare table
#[derive(Clone, Debug)]
pub struct FareDatabase {
    pool: SqlitePool,
}

/// A stored fare row
#[derive(Clone, Debug, FromRow)]
pub struct FareRow {
    /// Row id
    pub id: i64,
    /// Task that produced the fare
    pub task_id: String,
    /// Outbound departure date (YYYY-MM-DD)
    pub departure_date: Option<String>,
    /// Inbound departure date (YYYY-MM-DD)
    pub return_date: Option<String>,
    /// Fare before tax
    pub price: f64,
    /// Tax amount
    pub tax: f64,
    /// First outbound flight number
    pub outbound_flight_1: Option<String>,
    /// First outbound cabin class
    pub outbound_cabin_1: Option<String>,
    /// Second outbound flight number
    pub outbound_flight_2: Option<String>,
    /// Second outbound cabin class
    pub outbound_cabin_2: Option<String>,
    /// Third outbound flight number
    pub outbound_flight_3: Option<String>,
    /// Third outbound cabin class
    pub outbound_cabin_3: Option<String>,
    /// First inbound flight number
    pub inbound_flight_1: Option<String>,
    /// First inbound cabin class
    pub inbound_cabin_1: Option<String>,
    /// Second inbound flight number
    pub inbound_flight_2: Option<String>,
    /// Second inbound cabin class
    pub inbound_cabin_2: Option<String>,
    /// Third inbound flight number
    pub inbound_flight_3: Option<String>,
    /// Third inbound cabin class
    pub inbound_cabin_3: Option<String>,
    /// Unix timestamp of the write
    pub crawl_time: i64,
}

/// Blob + table persister
#[derive(Clone, Debug)]
pub struct FareStore {
    blobs: BlobStore,
    db: FareDatabase,
}

impl FareStore {
    /// Open both sinks as configured
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let db = FareDatabase::open(&config.database_path).await?;
        Ok(Self::new(BlobStore::new(&config.blob_dir), db))
    }

    /// Combine already-open sinks
    pub fn new(blobs: BlobStore, db: FareDatabase) -> Self {
        Self { blobs, db }
    }

    /// The tabular sink
    pub fn database(&self) -> &FareDatabase {
        &self.db
    }

    /// The blob sink
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}

#[async_trait]
impl Persister for FareStore {
    async fn persist(
        &self,
        task_id: &TaskId,
        records: &[FareRecord],
        raw: &Value,
    ) -> Result<PersistReport> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");

        let blob = self
            .blobs
            .write_json(&format!("flight_data_{task_id}_{stamp}.json"), records)
            .await;
        let rows = self.db.insert_fares(task_id, records).await;

        let raw_blob_path = match self
            .blobs
            .write_json(&format!("api_response_{task_id}_{stamp}.json"), raw)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(
                    task_id = %task_id,
                    error = %e,
                    "Failed to keep raw search response"
                );
                None
            }
        };

        let blob_path: PathBuf = blob.inspect_err(|e| {
            tracing::error!(task_id = %task_id, error = %e, "Blob sink failed");
        })?;
        let rows_written = rows.inspect_err(|e| {
            tracing::error!(task_id = %task_id, error = %e, "Table sink failed");
        })?;

        tracing::debug!(
            task_id = %task_id,
            blob = %blob_path.display(),
            rows_written,
            "Fares persisted"
        );

        Ok(PersistReport {
            blob_path,
            rows_written,
            raw_blob_path,
        })
    }
}

//! Fare row inserts and queries.

use crate::error::StorageError;
use crate::types::{FareRecord, FlightSegment, TaskId};
use crate::{Error, Result};

use super::{FareDatabase, FareRow};

/// Segments beyond this many per direction are not stored as columns
pub const MAX_SEGMENTS_PER_DIRECTION: usize = 3;

fn segment_columns(segments: &[FlightSegment]) -> [Option<&str>; MAX_SEGMENTS_PER_DIRECTION * 2] {
    let mut columns = [None; MAX_SEGMENTS_PER_DIRECTION * 2];
    for (i, segment) in segments.iter().take(MAX_SEGMENTS_PER_DIRECTION).enumerate() {
        columns[i * 2] = Some(segment.flight_number.as_str());
        columns[i * 2 + 1] = Some(segment.cabin_class.as_str());
    }
    columns
}

impl FareDatabase {
    /// Insert one row per fare record in a single transaction
    ///
    /// Returns the number of rows written.
    pub async fn insert_fares(&self, task_id: &TaskId, records: &[FareRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let crawl_time = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Storage(StorageError::TableWrite(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut written = 0;
        for record in records {
            let outbound = segment_columns(&record.outbound_segments);
            let inbound = segment_columns(&record.inbound_segments);

            let result = sqlx::query(
                r#"
                INSERT INTO fares (
                    task_id, departure_date, return_date, price, tax,
                    outbound_flight_1, outbound_cabin_1,
                    outbound_flight_2, outbound_cabin_2,
                    outbound_flight_3, outbound_cabin_3,
                    inbound_flight_1, inbound_cabin_1,
                    inbound_flight_2, inbound_cabin_2,
                    inbound_flight_3, inbound_cabin_3,
                    crawl_time
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(task_id.as_str())
            .bind(record.departure_date.map(|d| d.to_string()))
            .bind(record.return_date.map(|d| d.to_string()))
            .bind(record.price)
            .bind(record.tax)
            .bind(outbound[0])
            .bind(outbound[1])
            .bind(outbound[2])
            .bind(outbound[3])
            .bind(outbound[4])
            .bind(outbound[5])
            .bind(inbound[0])
            .bind(inbound[1])
            .bind(inbound[2])
            .bind(inbound[3])
            .bind(inbound[4])
            .bind(inbound[5])
            .bind(crawl_time)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Storage(StorageError::TableWrite(format!(
                    "Failed to insert fare row: {}",
                    e
                )))
            })?;

            written += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Storage(StorageError::TableWrite(format!(
                "Failed to commit fare rows: {}",
                e
            )))
        })?;

        Ok(written)
    }

    /// Rows written for a task, in insertion order
    pub async fn fares_for_task(&self, task_id: &TaskId) -> Result<Vec<FareRow>> {
        let rows = sqlx::query_as::<_, FareRow>(
            r#"
            SELECT id, task_id, departure_date, return_date, price, tax,
                   outbound_flight_1, outbound_cabin_1,
                   outbound_flight_2, outbound_cabin_2,
                   outbound_flight_3, outbound_cabin_3,
                   inbound_flight_1, inbound_cabin_1,
                   inbound_flight_2, inbound_cabin_2,
                   inbound_flight_3, inbound_cabin_3,
                   crawl_time
            FROM fares
            WHERE task_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(task_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows)
    }

    /// Total number of stored fare rows
    pub async fn count_fares(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fares")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(count)
    }
}

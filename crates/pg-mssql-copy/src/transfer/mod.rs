//! Per-table copy pipeline.
//!
//! Implements the skip/create/stream/verify contract for a single table:
//! existence short-circuit, destination DDL, cursor-fed batches cleaned and
//! bulk-loaded through a session staging table, then a row-count check
//! against the pre-copy snapshot.

mod clean;

pub use clean::{clean_batch, TimestampRange};

use crate::error::{CopyError, Result};
use crate::source::{PgSourcePool, Table};
use crate::target::MssqlPool;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tiberius::Client;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::compat::Compat;
use tracing::{info, warn};

/// Smallest batch the copier will use.
pub const MIN_BATCH_ROWS: i64 = 10_000;
/// Largest batch the copier will use.
pub const MAX_BATCH_ROWS: i64 = 50_000;
/// Tables are split into roughly this many batches before clamping.
pub const BATCH_DIVISOR: i64 = 20;

/// Batch size for a table: a twentieth of the snapshot, clamped to
/// [10_000, 50_000].
pub fn batch_size_for(total_rows: i64) -> usize {
    (total_rows / BATCH_DIVISOR).clamp(MIN_BATCH_ROWS, MAX_BATCH_ROWS) as usize
}

/// Terminal state of one table's copy.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    /// Table was created and fully copied.
    Copied { rows: i64, elapsed_seconds: f64 },
    /// Destination table already existed; nothing written.
    Skipped,
    /// Copy failed; the run continues with other tables.
    Failed { reason: String },
}

/// Per-table entry in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

/// Copies one table end to end.
pub struct TableCopier {
    source: Arc<PgSourcePool>,
    target: Arc<MssqlPool>,
    source_schema: String,
    target_schema: String,
    ts_range: TimestampRange,
    cancel: Option<watch::Receiver<bool>>,
}

impl TableCopier {
    pub fn new(
        source: Arc<PgSourcePool>,
        target: Arc<MssqlPool>,
        source_schema: impl Into<String>,
        target_schema: impl Into<String>,
        ts_range: TimestampRange,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Self {
        Self {
            source,
            target,
            source_schema: source_schema.into(),
            target_schema: target_schema.into(),
            ts_range,
            cancel,
        }
    }

    /// Copy a single table. Never touches an existing destination table.
    pub async fn copy_table(&self, table: &str) -> Result<TableOutcome> {
        if self.target.table_exists(&self.target_schema, table).await? {
            info!(
                "Skipping {}.{}: destination table already exists",
                self.target_schema, table
            );
            return Ok(TableOutcome::Skipped);
        }

        let started = Instant::now();

        let columns = self.source.describe_table(&self.source_schema, table).await?;
        if columns.is_empty() {
            return Err(CopyError::Schema(format!(
                "no columns found for {}.{}",
                self.source_schema, table
            )));
        }

        self.target.ensure_schema(&self.target_schema).await?;
        self.target
            .create_table(&self.target_schema, table, &columns)
            .await?;

        // Snapshot once; never refreshed during the copy.
        let total_rows = self
            .source
            .snapshot_row_count(&self.source_schema, table)
            .await?;

        let descriptor = Table {
            schema: self.source_schema.clone(),
            name: table.to_string(),
            columns,
            row_count: total_rows,
        };
        let batch_size = batch_size_for(descriptor.row_count);

        info!(
            "Copying {}: {} rows, batch size {}",
            descriptor.full_name(),
            descriptor.row_count,
            batch_size
        );

        // The staging table is session-scoped, so every staging operation for
        // this table runs on one dedicated connection held to the end.
        let staging = format!("#stage_{}", table);
        let mut conn = self.target.get_conn().await?;

        let copied = self
            .copy_rows(&mut conn, &descriptor, batch_size, &staging)
            .await;

        // Cleanup runs on success, failure and cancellation alike.
        if let Err(e) = MssqlPool::drop_staging_if_exists(&mut conn, &staging).await {
            warn!("Failed to drop staging table {}: {}", staging, e);
        }
        drop(conn);

        let copied = copied?;

        let dest_rows = self.target.row_count(&self.target_schema, table).await?;
        if dest_rows != total_rows {
            return Err(CopyError::RowCountMismatch {
                table: format!("{}.{}", self.target_schema, table),
                source_rows: total_rows,
                destination_rows: dest_rows,
            });
        }

        let elapsed = started.elapsed();
        info!(
            "Copied {}.{}: {} rows in {:.1}s",
            self.target_schema,
            table,
            copied,
            elapsed.as_secs_f64()
        );

        Ok(TableOutcome::Copied {
            rows: copied,
            elapsed_seconds: elapsed.as_secs_f64(),
        })
    }

    async fn copy_rows(
        &self,
        conn: &mut Client<Compat<TcpStream>>,
        descriptor: &Table,
        batch_size: usize,
        staging: &str,
    ) -> Result<i64> {
        let table = descriptor.name.as_str();
        let columns = descriptor.columns.as_slice();
        let total_rows = descriptor.row_count;

        MssqlPool::create_staging_table(conn, staging, columns).await?;

        let mut cursor = self
            .source
            .open_cursor(&descriptor.schema, table, columns)
            .await?;

        let mut copied: i64 = 0;

        loop {
            // Checked between batches so an in-flight batch always finishes
            // its stage-and-drain cycle before the copier stops.
            if self.cancelled() {
                info!("Cancellation requested, stopping copy of {}", table);
                let _ = cursor.close().await;
                return Err(CopyError::Cancelled);
            }

            let batch_started = Instant::now();
            let mut batch = cursor.fetch(batch_size).await?;
            if batch.is_empty() {
                break;
            }

            clean_batch(&mut batch, &self.ts_range);

            let n = batch.len();
            MssqlPool::bulk_insert_batch(conn, staging, columns, &batch).await?;
            MssqlPool::drain_staging(conn, &self.target_schema, table, staging, columns, n)
                .await?;

            copied += n as i64;
            let pct = if total_rows > 0 {
                copied as f64 * 100.0 / total_rows as f64
            } else {
                100.0
            };
            let rate = n as f64 / batch_started.elapsed().as_secs_f64().max(0.001);
            info!(
                "{}: {}/{} rows ({:.1}%, {:.0} rows/s)",
                table, copied, total_rows, pct, rate
            );
        }

        cursor.close().await?;
        Ok(copied)
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_small_table_clamps_to_min() {
        assert_eq!(batch_size_for(0), 10_000);
        assert_eq!(batch_size_for(500), 10_000);
        assert_eq!(batch_size_for(125_000), 10_000);
    }

    #[test]
    fn test_batch_size_125k_yields_13_batches() {
        let total: i64 = 125_000;
        let batch = batch_size_for(total) as i64;
        assert_eq!(batch, 10_000);
        let batches = (total + batch - 1) / batch;
        assert_eq!(batches, 13);
    }

    #[test]
    fn test_batch_size_mid_range_uses_divisor() {
        assert_eq!(batch_size_for(400_000), 20_000);
        assert_eq!(batch_size_for(1_000_000), 50_000);
    }

    #[test]
    fn test_batch_size_huge_table_clamps_to_max() {
        assert_eq!(batch_size_for(100_000_000), 50_000);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let report = TableReport {
            table: "kawasaki.orders".into(),
            outcome: TableOutcome::Copied {
                rows: 42,
                elapsed_seconds: 1.5,
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "copied");
        assert_eq!(json["rows"], 42);
        assert_eq!(json["table"], "kawasaki.orders");

        let failed = TableReport {
            table: "t".into(),
            outcome: TableOutcome::Failed {
                reason: "boom".into(),
            },
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "boom");
    }
}

//! Run orchestration.
//!
//! Enumerates candidate tables, fans copies out to a bounded worker pool and
//! collects per-table outcomes into a run summary. One table's failure never
//! aborts the others; a run always finishes and reports.

use crate::config::Config;
use crate::error::{CopyError, Result};
use crate::source::PgSourcePool;
use crate::target::MssqlPool;
use crate::transfer::{TableCopier, TableOutcome, TableReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

/// Summary of one copy run.
#[derive(Debug, Serialize)]
pub struct CopyRunResult {
    pub status: RunStatus,
    pub source_schema: String,
    pub target_schema: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tables_total: usize,
    pub tables_copied: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,
    pub rows_copied: i64,
    pub failed_tables: Vec<String>,
    pub reports: Vec<TableReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl CopyRunResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a `validate` pass: per-table source vs destination counts.
#[derive(Debug, Serialize)]
pub struct ValidateReport {
    pub table: String,
    pub source_rows: i64,
    pub destination_rows: Option<i64>,
    pub matches: bool,
}

/// Drives a full copy run.
pub struct Orchestrator {
    config: Config,
    source: Arc<PgSourcePool>,
    target: Arc<MssqlPool>,
}

impl Orchestrator {
    /// Connect both pools and build an orchestrator.
    pub async fn new(config: Config) -> Result<Self> {
        let source = Arc::new(
            PgSourcePool::new(&config.source, config.copy.get_max_source_connections()).await?,
        );
        let target = Arc::new(
            MssqlPool::new(&config.target, config.copy.get_max_target_connections() as u32)
                .await?,
        );

        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Enumerate candidate tables without copying anything.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.source
            .list_tables(&self.config.source.schema, &self.config.copy.skip_prefixes)
            .await
    }

    /// Verify both databases are reachable.
    pub async fn health_check(&self) -> Result<()> {
        self.source.test_connection().await?;
        self.target.test_connection().await?;
        info!("Health check passed: source and target reachable");
        Ok(())
    }

    /// Run the full copy: every candidate table, bounded parallelism.
    pub async fn run(&self, cancel: Option<watch::Receiver<bool>>) -> Result<CopyRunResult> {
        let started_at = Utc::now();
        let started = Instant::now();

        let tables = self.list_tables().await?;
        let tables_total = tables.len();
        let workers = self.config.copy.get_workers();

        info!(
            "Starting copy of {} tables from '{}' to '{}' with {} workers",
            tables_total, self.config.source.schema, self.config.target.schema, workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::with_capacity(tables_total);
        let mut cancelled = false;

        for table in tables {
            if is_cancelled(&cancel) {
                warn!("Cancellation requested, not starting remaining tables");
                cancelled = true;
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CopyError::pool(e, "acquiring worker permit"))?;

            let copier = TableCopier::new(
                self.source.clone(),
                self.target.clone(),
                self.config.source.schema.clone(),
                self.config.target.schema.clone(),
                self.config.copy.timestamp_range(),
                cancel.clone(),
            );

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = match copier.copy_table(&table).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Copy failed for {}: {}", table, e);
                        TableOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                TableReport { table, outcome }
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Copy task panicked: {}", e);
                    reports.push(TableReport {
                        table: "<unknown>".into(),
                        outcome: TableOutcome::Failed {
                            reason: format!("task panicked: {}", e),
                        },
                    });
                }
            }
        }

        let result = summarize(
            reports,
            tables_total,
            cancelled || is_cancelled(&cancel),
            &self.config,
            started_at,
            started.elapsed().as_secs_f64(),
        );

        info!(
            "Copy run finished: {:?}, {} copied, {} skipped, {} failed, {} rows",
            result.status,
            result.tables_copied,
            result.tables_skipped,
            result.tables_failed,
            result.rows_copied
        );

        Ok(result)
    }

    /// Compare source and destination row counts for every candidate table.
    pub async fn validate(&self) -> Result<Vec<ValidateReport>> {
        let tables = self.list_tables().await?;
        let mut reports = Vec::with_capacity(tables.len());

        for table in tables {
            let source_rows = self
                .source
                .snapshot_row_count(&self.config.source.schema, &table)
                .await?;

            let destination_rows = if self
                .target
                .table_exists(&self.config.target.schema, &table)
                .await?
            {
                Some(
                    self.target
                        .row_count(&self.config.target.schema, &table)
                        .await?,
                )
            } else {
                None
            };

            let matches = destination_rows == Some(source_rows);
            reports.push(ValidateReport {
                table,
                source_rows,
                destination_rows,
                matches,
            });
        }

        Ok(reports)
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}

fn summarize(
    reports: Vec<TableReport>,
    tables_total: usize,
    cancelled: bool,
    config: &Config,
    started_at: DateTime<Utc>,
    duration_seconds: f64,
) -> CopyRunResult {
    let mut tables_copied = 0;
    let mut tables_skipped = 0;
    let mut tables_failed = 0;
    let mut rows_copied = 0i64;
    let mut failed_tables = Vec::new();

    for report in &reports {
        match &report.outcome {
            TableOutcome::Copied { rows, .. } => {
                tables_copied += 1;
                rows_copied += rows;
            }
            TableOutcome::Skipped => tables_skipped += 1,
            TableOutcome::Failed { .. } => {
                tables_failed += 1;
                failed_tables.push(report.table.clone());
            }
        }
    }

    let status = if cancelled {
        RunStatus::Cancelled
    } else if tables_failed > 0 {
        RunStatus::CompletedWithErrors
    } else {
        RunStatus::Completed
    };

    CopyRunResult {
        status,
        source_schema: config.source.schema.clone(),
        target_schema: config.target.schema.clone(),
        started_at,
        completed_at: Utc::now(),
        duration_seconds,
        tables_total,
        tables_copied,
        tables_skipped,
        tables_failed,
        rows_copied,
        failed_tables,
        reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CopyConfig, SourceConfig, TargetConfig};

    fn test_config() -> Config {
        Config {
            source: SourceConfig {
                host: "h".into(),
                port: 5432,
                database: "d".into(),
                user: "u".into(),
                password: "p".into(),
                schema: "curated_kawasaki_registry".into(),
                ssl_mode: "disable".into(),
            },
            target: TargetConfig {
                host: "h".into(),
                port: 1433,
                database: "d".into(),
                user: "u".into(),
                password: "p".into(),
                schema: "kawasaki".into(),
                encrypt: "false".into(),
                trust_server_cert: false,
            },
            copy: CopyConfig::default(),
        }
    }

    fn report(table: &str, outcome: TableOutcome) -> TableReport {
        TableReport {
            table: table.into(),
            outcome,
        }
    }

    #[test]
    fn test_summarize_mixed_outcomes() {
        let reports = vec![
            report(
                "a",
                TableOutcome::Copied {
                    rows: 100,
                    elapsed_seconds: 0.1,
                },
            ),
            report("b", TableOutcome::Skipped),
            report(
                "c",
                TableOutcome::Failed {
                    reason: "row count mismatch".into(),
                },
            ),
        ];

        let result = summarize(reports, 3, false, &test_config(), Utc::now(), 1.0);
        assert_eq!(result.status, RunStatus::CompletedWithErrors);
        assert_eq!(result.tables_copied, 1);
        assert_eq!(result.tables_skipped, 1);
        assert_eq!(result.tables_failed, 1);
        assert_eq!(result.rows_copied, 100);
        assert_eq!(result.failed_tables, vec!["c"]);
    }

    #[test]
    fn test_summarize_all_good() {
        let reports = vec![
            report(
                "a",
                TableOutcome::Copied {
                    rows: 5,
                    elapsed_seconds: 0.1,
                },
            ),
            report("b", TableOutcome::Skipped),
        ];
        let result = summarize(reports, 2, false, &test_config(), Utc::now(), 1.0);
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.failed_tables.is_empty());
    }

    #[test]
    fn test_summarize_cancelled_wins() {
        let reports = vec![report(
            "a",
            TableOutcome::Copied {
                rows: 5,
                elapsed_seconds: 0.1,
            },
        )];
        let result = summarize(reports, 4, true, &test_config(), Utc::now(), 1.0);
        assert_eq!(result.status, RunStatus::Cancelled);
    }

    #[test]
    fn test_run_result_json_shape() {
        let reports = vec![report(
            "orders",
            TableOutcome::Copied {
                rows: 125_000,
                elapsed_seconds: 12.0,
            },
        )];
        let result = summarize(reports, 1, false, &test_config(), Utc::now(), 12.5);
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["tables_copied"], 1);
        assert_eq!(json["rows_copied"], 125_000);
        assert_eq!(json["reports"][0]["table"], "orders");
        assert_eq!(json["reports"][0]["status"], "copied");
    }
}

//! # pg-mssql-copy
//!
//! Bulk single-table copy from PostgreSQL to Microsoft SQL Server.
//!
//! Enumerates the tables of a source schema (excluding reserved staging
//! prefixes), then copies each one that does not yet exist at the
//! destination:
//!
//! - **Destination DDL** from a fixed PostgreSQL to SQL Server type mapping
//! - **Batched streaming** through a server-side cursor, batch size derived
//!   from a one-time row-count snapshot
//! - **Staged bulk loads** via TDS bulk insert into a session temp table,
//!   drained into the destination with transactional `INSERT TOP`/`DELETE TOP`
//! - **Value cleaning** for out-of-range timestamps and non-finite floats
//! - **Row-count verification** against the snapshot
//! - **Bounded parallelism** across tables with per-table error isolation
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_mssql_copy::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> pg_mssql_copy::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(None).await?;
//!     println!("Copied {} rows", result.rows_copied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, CopyConfig, SourceConfig, TargetConfig};
pub use error::{CopyError, Result};
pub use orchestrator::{CopyRunResult, Orchestrator, RunStatus, ValidateReport};
pub use source::{Column, PgSourcePool, Table};
pub use target::{MssqlPool, SqlValue};
pub use transfer::{TableCopier, TableOutcome, TableReport, TimestampRange};
pub use typemap::postgres_to_mssql;

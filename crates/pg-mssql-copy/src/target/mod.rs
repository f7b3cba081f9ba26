//! SQL Server target database operations.
//!
//! Existence checks, DDL, TDS bulk insert into a session staging table and
//! the append-then-drain protocol that moves staged rows into the
//! destination table.

use crate::config::TargetConfig;
use crate::error::{CopyError, Result};
use crate::source::Column;
use crate::typemap::postgres_to_mssql;
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::Timelike;
use std::borrow::Cow;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, ToSql, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

/// Maximum string length (in bytes) for TDS bulk insert.
/// Tiberius bulk insert has a hard limit of 65535 bytes for UTF-16 encoded
/// strings. Longer strings go through the parameterized INSERT fallback.
const BULK_INSERT_STRING_LIMIT: usize = 65535;

/// A typed row value on its way to the destination.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(SqlNullType),
    Bool(bool),
    I32(i32),
    F64(f64),
    String(String),
    Decimal(rust_decimal::Decimal),
    DateTime(chrono::NaiveDateTime),
    Date(chrono::NaiveDate),
}

/// Type hint carried by NULLs so bulk insert sends the right wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlNullType {
    Bool,
    I32,
    F64,
    String,
    Decimal,
    DateTime,
    Date,
}

/// Connection manager for the bb8 pool with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: TargetConfig,
}

impl TiberiusConnectionManager {
    fn new(config: TargetConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        match self.config.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                config.encryption(EncryptionLevel::Required);
            }
        }

        if self.config.trust_server_cert {
            config.trust_cert();
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// A pooled SQL Server connection. Staging operations for one table all run
/// on a single checkout because local temp tables are session-scoped.
pub type MssqlConnection<'a> = PooledConnection<'a, TiberiusConnectionManager>;

/// SQL Server target pool.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlPool {
    /// Create a new SQL Server target pool from TargetConfig.
    pub async fn new(config: &TargetConfig, max_conns: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_conns)
            .build(manager)
            .await
            .map_err(|e| CopyError::pool(e, "creating SQL Server target pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| CopyError::pool(e, "testing SQL Server target connection"))?;
            conn.simple_query("SELECT 1").await?;
        }

        info!(
            "Connected to SQL Server target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub async fn get_conn(&self) -> Result<MssqlConnection<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting SQL Server target connection"))
    }

    /// Test the connection.
    pub async fn test_connection(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    /// Check whether a user table exists.
    pub async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        let query = "SELECT OBJECT_ID(QUOTENAME(@P1) + '.' + QUOTENAME(@P2), 'U')";
        let row = conn
            .query(query, &[&schema, &table])
            .await?
            .into_row()
            .await?;

        Ok(matches!(row, Some(r) if r.get::<i32, _>(0).is_some()))
    }

    /// Create the target schema if it does not exist.
    pub async fn ensure_schema(&self, schema: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;

        let query = "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = @P1) \
                     EXEC('CREATE SCHEMA ' + QUOTENAME(@P1))";
        conn.execute(query, &[&schema])
            .await
            .map_err(|e| CopyError::Schema(format!("creating schema {}: {}", schema, e)))?;

        Ok(())
    }

    /// Create the destination table from introspected source columns.
    pub async fn create_table(&self, schema: &str, table: &str, columns: &[Column]) -> Result<()> {
        let ddl = build_create_table_sql(schema, table, columns);
        debug!("Creating table: {}", ddl);

        let mut conn = self.get_conn().await?;
        conn.execute(ddl.as_str(), &[])
            .await
            .map_err(|e| CopyError::Schema(format!("creating table {}.{}: {}", schema, table, e)))?;

        Ok(())
    }

    /// Exact destination row count.
    pub async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let mut conn = self.get_conn().await?;

        let query = format!(
            "SELECT COUNT_BIG(*) FROM {}.{}",
            quote_ident(schema),
            quote_ident(table)
        );
        let row = conn
            .query(query.as_str(), &[])
            .await?
            .into_row()
            .await?
            .ok_or_else(|| CopyError::Schema(format!("COUNT(*) returned no row for {}.{}", schema, table)))?;

        Ok(row.get::<i64, _>(0).unwrap_or(0))
    }

    /// Create the session staging table on the given connection.
    ///
    /// Same column structure as the destination. Local temp tables vanish
    /// when the session ends, which backstops explicit cleanup.
    pub async fn create_staging_table(
        conn: &mut Client<Compat<TcpStream>>,
        staging: &str,
        columns: &[Column],
    ) -> Result<()> {
        let cols = column_definitions(columns);
        let ddl = format!("CREATE TABLE {} ({})", quote_ident(staging), cols);
        debug!("Creating staging table: {}", ddl);

        conn.execute(ddl.as_str(), &[])
            .await
            .map_err(|e| CopyError::Schema(format!("creating staging table {}: {}", staging, e)))?;

        Ok(())
    }

    /// Bulk insert a cleaned batch into the staging table.
    ///
    /// Rows with strings over the TDS limit fall back to parameterized
    /// INSERT. Returns the number of rows written.
    pub async fn bulk_insert_batch(
        conn: &mut Client<Compat<TcpStream>>,
        staging: &str,
        columns: &[Column],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let quoted = quote_ident(staging);

        let mut bulk_rows = Vec::with_capacity(rows.len());
        let mut oversized_rows = Vec::new();
        for row in rows {
            if row_has_oversized_strings(row) {
                oversized_rows.push(row.clone());
            } else {
                bulk_rows.push(row.clone());
            }
        }

        let mut total_inserted = 0u64;

        if !bulk_rows.is_empty() {
            let bulk_count = bulk_rows.len() as u64;

            let mut bulk_load = conn
                .bulk_insert(&quoted)
                .await
                .map_err(|e| CopyError::transfer(staging, format!("bulk insert init: {}", e)))?;

            for row in bulk_rows {
                let mut token_row = TokenRow::new();
                for value in &row {
                    token_row.push(sql_value_to_column_data(value));
                }
                bulk_load
                    .send(token_row)
                    .await
                    .map_err(|e| CopyError::transfer(staging, format!("bulk insert send: {}", e)))?;
            }

            bulk_load
                .finalize()
                .await
                .map_err(|e| CopyError::transfer(staging, format!("bulk insert finalize: {}", e)))?;

            total_inserted += bulk_count;
        }

        if !oversized_rows.is_empty() {
            debug!(
                "Falling back to INSERT for {} rows with oversized strings in {}",
                oversized_rows.len(),
                staging
            );
            total_inserted +=
                Self::insert_rows_fallback(conn, &quoted, columns, &oversized_rows).await?;
        }

        Ok(total_inserted)
    }

    /// Insert rows via parameterized INSERT (fallback for oversized strings).
    /// Batches rows per statement up to the 2100 parameter limit.
    async fn insert_rows_fallback(
        conn: &mut Client<Compat<TcpStream>>,
        qualified_table: &str,
        columns: &[Column],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let col_str = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let cols_per_row = columns.len();
        let max_rows_per_batch = if cols_per_row > 0 {
            (2100 / cols_per_row).max(1)
        } else {
            rows.len()
        };

        let mut total_inserted = 0u64;

        for batch in rows.chunks(max_rows_per_batch) {
            let mut value_groups = Vec::with_capacity(batch.len());
            let mut param_idx = 1;

            for _ in batch.iter() {
                let placeholders: Vec<String> = (0..cols_per_row)
                    .map(|_| {
                        let p = format!("@P{}", param_idx);
                        param_idx += 1;
                        p
                    })
                    .collect();
                value_groups.push(format!("({})", placeholders.join(", ")));
            }

            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                qualified_table,
                col_str,
                value_groups.join(", ")
            );

            let params: Vec<Box<dyn ToSql>> = batch
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_sql_param))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            conn.execute(sql.as_str(), &param_refs).await.map_err(|e| {
                CopyError::transfer(
                    qualified_table,
                    format!("batched INSERT ({} rows): {}", batch.len(), e),
                )
            })?;

            total_inserted += batch.len() as u64;
        }

        Ok(total_inserted)
    }

    /// Move exactly `n` rows from staging into the destination table,
    /// inside a single transaction.
    pub async fn drain_staging(
        conn: &mut Client<Compat<TcpStream>>,
        target_schema: &str,
        target_table: &str,
        staging: &str,
        columns: &[Column],
        n: usize,
    ) -> Result<()> {
        let sql = build_drain_sql(target_schema, target_table, staging, columns, n);
        conn.simple_query(sql.as_str())
            .await
            .map_err(|e| {
                CopyError::transfer(
                    format!("{}.{}", target_schema, target_table),
                    format!("draining {} rows from staging: {}", n, e),
                )
            })?
            .into_results()
            .await
            .map_err(|e| {
                CopyError::transfer(
                    format!("{}.{}", target_schema, target_table),
                    format!("draining {} rows from staging: {}", n, e),
                )
            })?;
        Ok(())
    }

    /// Drop the staging table if it still exists. Best-effort cleanup path.
    pub async fn drop_staging_if_exists(
        conn: &mut Client<Compat<TcpStream>>,
        staging: &str,
    ) -> Result<()> {
        let sql = build_drop_staging_sql(staging);
        conn.simple_query(sql.as_str()).await?.into_results().await?;
        Ok(())
    }
}

/// Quote a SQL Server identifier with brackets.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Column definition list for CREATE TABLE statements.
fn column_definitions(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| {
            format!(
                "{} {}",
                quote_ident(&c.name),
                postgres_to_mssql(&c.data_type, c.max_length)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build destination CREATE TABLE DDL from source columns.
pub fn build_create_table_sql(schema: &str, table: &str, columns: &[Column]) -> String {
    format!(
        "CREATE TABLE {}.{} ({})",
        quote_ident(schema),
        quote_ident(table),
        column_definitions(columns)
    )
}

/// Build the transactional append-then-drain statement.
///
/// Each batch fully drains the rows it just staged, so TOP (n) covers the
/// staging table's entire contents at drain time.
fn build_drain_sql(
    target_schema: &str,
    target_table: &str,
    staging: &str,
    columns: &[Column],
    n: usize,
) -> String {
    let col_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "BEGIN TRANSACTION;\n\
         INSERT INTO {schema}.{table} ({cols})\n\
         SELECT TOP ({n}) {cols} FROM {staging};\n\
         DELETE TOP ({n}) FROM {staging};\n\
         COMMIT TRANSACTION;",
        schema = quote_ident(target_schema),
        table = quote_ident(target_table),
        cols = col_list,
        n = n,
        staging = quote_ident(staging),
    )
}

/// Build the guarded staging drop. The staging name lands in a string
/// literal as well as an identifier position, so both get escaped.
fn build_drop_staging_sql(staging: &str) -> String {
    format!(
        "IF OBJECT_ID('tempdb..{}') IS NOT NULL DROP TABLE {}",
        staging.replace('\'', "''"),
        quote_ident(staging)
    )
}

/// Check if a row contains string values over the bulk insert limit.
fn row_has_oversized_strings(row: &[SqlValue]) -> bool {
    for value in row {
        if let SqlValue::String(s) = value {
            let utf16_len: usize = s.chars().map(|c| c.len_utf16() * 2).sum();
            if utf16_len > BULK_INSERT_STRING_LIMIT {
                return true;
            }
        }
    }
    false
}

fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(_) => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::String(s) => Box::new(s.clone()),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::Date(d) => Box::new(*d),
    }
}

/// Convert SqlValue to tiberius ColumnData for TDS bulk insert.
fn sql_value_to_column_data(value: &SqlValue) -> ColumnData<'static> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => ColumnData::Bit(None),
            SqlNullType::I32 => ColumnData::I32(None),
            SqlNullType::F64 => ColumnData::F64(None),
            SqlNullType::String => ColumnData::String(None),
            SqlNullType::Decimal => ColumnData::Numeric(None),
            SqlNullType::DateTime => ColumnData::DateTime2(None),
            SqlNullType::Date => ColumnData::Date(None),
        },
        SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
        SqlValue::I32(i) => ColumnData::I32(Some(*i)),
        SqlValue::F64(f) => {
            if f.is_nan() || f.is_infinite() {
                // SQL Server FLOAT cannot hold NaN/Infinity
                warn!("Converting F64 NaN/Infinity to NULL");
                ColumnData::F64(None)
            } else {
                ColumnData::F64(Some(*f))
            }
        }
        SqlValue::String(s) => ColumnData::String(Some(Cow::Owned(s.clone()))),
        SqlValue::Decimal(d) => {
            let scale = d.scale() as u8;
            let mantissa = d.mantissa();
            ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
                mantissa, scale,
            )))
        }
        SqlValue::DateTime(dt) => {
            // DATETIME2 wire format: days since year 1 plus 100ns increments
            // since midnight at scale 7
            let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
            let days_i64 = (dt.date() - epoch).num_days();
            if days_i64 < 0 || days_i64 > u32::MAX as i64 {
                warn!("DateTime out of valid range (days={}), converting to NULL", days_i64);
                return ColumnData::DateTime2(None);
            }
            let date = tiberius::time::Date::new(days_i64 as u32);
            let time_val = dt.time();
            let nanos = time_val.num_seconds_from_midnight() as u64 * 1_000_000_000
                + time_val.nanosecond() as u64;
            let increments = nanos / 100;
            let time = tiberius::time::Time::new(increments, 7);
            ColumnData::DateTime2(Some(tiberius::time::DateTime2::new(date, time)))
        }
        SqlValue::Date(d) => {
            let epoch = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
            let days_i64 = (*d - epoch).num_days();
            if days_i64 < 0 || days_i64 > u32::MAX as i64 {
                warn!("Date out of valid range (days={}), converting to NULL", days_i64);
                return ColumnData::Date(None);
            }
            ColumnData::Date(Some(tiberius::time::Date::new(days_i64 as u32)))
        }
    }
}

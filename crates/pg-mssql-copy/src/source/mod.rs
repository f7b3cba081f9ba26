//! PostgreSQL source database operations.
//!
//! Schema enumeration, column introspection, row-count snapshots and
//! cursor-based chunked reads.

mod types;

pub use types::{Column, Table};

use crate::config::SourceConfig;
use crate::error::{CopyError, Result};
use crate::target::{SqlNullType, SqlValue};
use deadpool_postgres::{Client, ClientWrapper, Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::ClientConfig;
use std::sync::Arc;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

/// PostgreSQL source pool.
pub struct PgSourcePool {
    pool: Pool,
}

impl PgSourcePool {
    /// Create a new PostgreSQL source pool from SourceConfig.
    pub async fn new(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| CopyError::pool(e, "creating PostgreSQL source pool"))?
            }
            _ => {
                let tls_config = Self::build_tls_config(&config.ssl_mode)?;
                let tls_connector = MakeRustlsConnect::new(tls_config);
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| CopyError::pool(e, "creating PostgreSQL source pool"))?
            }
        };

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "testing PostgreSQL source connection"))?;

        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Build TLS configuration based on ssl_mode.
    fn build_tls_config(ssl_mode: &str) -> Result<ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = match ssl_mode {
            "require" => {
                warn!(
                    "ssl_mode=require: TLS enabled but server certificate is not verified. \
                     Consider using 'verify-full' for production."
                );
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            "verify-ca" | "verify-full" => {
                info!("ssl_mode={}: certificate verification enabled", ssl_mode);
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
            other => {
                return Err(CopyError::Config(format!(
                    "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                    other
                )));
            }
        };

        Ok(config)
    }

    /// Test the connection.
    pub async fn test_connection(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "testing PostgreSQL source connection"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Enumerate candidate tables in a schema, excluding reserved prefixes.
    pub async fn list_tables(&self, schema: &str, skip_prefixes: &[String]) -> Result<Vec<String>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting connection for list_tables"))?;

        let query = r#"
            SELECT table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = $1
            ORDER BY table_name
        "#;

        let rows = client.query(query, &[&schema]).await?;
        let all: Vec<String> = rows.iter().map(|r| r.get::<_, String>(0)).collect();
        let tables = filter_reserved(all, skip_prefixes);

        info!("Found {} candidate tables in schema '{}'", tables.len(), schema);
        Ok(tables)
    }

    /// Introspect a table's columns in ordinal order.
    pub async fn describe_table(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting connection for describe_table"))?;

        let query = r#"
            SELECT
                column_name,
                data_type,
                character_maximum_length::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;

        let rows = client.query(query, &[&schema, &table]).await?;

        let columns: Vec<Column> = rows
            .iter()
            .map(|row| Column {
                name: row.get::<_, String>(0),
                data_type: row.get::<_, String>(1),
                max_length: row.get::<_, Option<i32>>(2),
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    /// Exact row count, snapshotted once before the copy.
    pub async fn snapshot_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting connection for snapshot_row_count"))?;

        let query = format!(
            "SELECT COUNT(*)::int8 FROM {}.{}",
            quote_ident(schema),
            quote_ident(table)
        );

        let row = client.query_one(&query, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    /// Open a server-side cursor over the full table in source order.
    ///
    /// The connection is detached from the pool for the cursor's lifetime so
    /// its transaction state cannot leak into other checkouts. Dropping the
    /// cursor without `close()` closes the TCP connection and aborts the
    /// transaction server-side.
    pub async fn open_cursor(
        &self,
        schema: &str,
        table: &str,
        columns: &[Column],
    ) -> Result<ChunkCursor> {
        let obj = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting connection for open_cursor"))?;
        // Detach from the pool: the cursor owns this connection and its
        // transaction until close(), and a dropped cursor closes it outright.
        let client = Client::take(obj);

        let name = format!("copy_{}", uuid::Uuid::new_v4().simple());
        let col_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        // No ORDER BY: batches arrive in whatever order the source engine
        // produces, same as a plain sequential scan.
        let declare = format!(
            "DECLARE {} NO SCROLL CURSOR FOR SELECT {} FROM {}.{}",
            name,
            col_list,
            quote_ident(schema),
            quote_ident(table)
        );

        client.batch_execute("BEGIN READ ONLY").await?;
        client.batch_execute(&declare).await?;

        debug!("Opened cursor {} on {}.{}", name, schema, table);

        Ok(ChunkCursor {
            client,
            name,
            col_types: columns.iter().map(|c| c.data_type.clone()).collect(),
        })
    }
}

/// A server-side cursor yielding row batches as `SqlValue` vectors.
pub struct ChunkCursor {
    client: ClientWrapper,
    name: String,
    col_types: Vec<String>,
}

impl ChunkCursor {
    /// Fetch up to `n` rows. An empty batch means the cursor is exhausted.
    pub async fn fetch(&mut self, n: usize) -> Result<Vec<Vec<SqlValue>>> {
        let query = format!("FETCH FORWARD {} FROM {}", n, self.name);
        let rows = self.client.query(&query, &[]).await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(self.col_types.len());
            for (idx, data_type) in self.col_types.iter().enumerate() {
                values.push(convert_pg_row_value(&row, idx, data_type));
            }
            result.push(values);
        }

        Ok(result)
    }

    /// Close the cursor and end its read-only transaction.
    pub async fn close(self) -> Result<()> {
        self.client
            .batch_execute(&format!("CLOSE {}; COMMIT", self.name))
            .await?;
        Ok(())
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Drop table names carrying a reserved staging prefix.
fn filter_reserved(tables: Vec<String>, skip_prefixes: &[String]) -> Vec<String> {
    tables
        .into_iter()
        .filter(|t| !skip_prefixes.iter().any(|p| t.starts_with(p.as_str())))
        .collect()
}

/// Convert a PostgreSQL row value to SqlValue based on column type.
///
/// Types outside the fixed mapping land in VARCHAR(MAX) columns, so their
/// values are rendered as strings here.
fn convert_pg_row_value(row: &tokio_postgres::Row, idx: usize, data_type: &str) -> SqlValue {
    let dt = data_type.to_lowercase();

    match dt.as_str() {
        "boolean" => row
            .try_get::<_, bool>(idx)
            .ok()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        "integer" => row
            .try_get::<_, i32>(idx)
            .ok()
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null(SqlNullType::I32)),
        "double precision" => row
            .try_get::<_, f64>(idx)
            .ok()
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null(SqlNullType::F64)),
        "numeric" => row
            .try_get::<_, rust_decimal::Decimal>(idx)
            .ok()
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        "timestamp without time zone" => row
            .try_get::<_, chrono::NaiveDateTime>(idx)
            .ok()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTime)),
        "date" => row
            .try_get::<_, chrono::NaiveDate>(idx)
            .ok()
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        "character varying" | "text" | "character" => row
            .try_get::<_, String>(idx)
            .ok()
            .map(SqlValue::String)
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        _ => stringify_pg_value(row, idx),
    }
}

/// Render an unmapped value as a string for its VARCHAR(MAX) column.
fn stringify_pg_value(row: &tokio_postgres::Row, idx: usize) -> SqlValue {
    if let Ok(v) = row.try_get::<_, String>(idx) {
        return SqlValue::String(v);
    }
    if let Ok(v) = row.try_get::<_, i64>(idx) {
        return SqlValue::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, i16>(idx) {
        return SqlValue::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, f32>(idx) {
        return SqlValue::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, rust_decimal::Decimal>(idx) {
        return SqlValue::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, uuid::Uuid>(idx) {
        return SqlValue::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, chrono::DateTime<chrono::FixedOffset>>(idx) {
        return SqlValue::String(v.to_rfc3339());
    }
    if let Ok(v) = row.try_get::<_, chrono::NaiveTime>(idx) {
        return SqlValue::String(v.to_string());
    }
    if let Ok(v) = row.try_get::<_, serde_json::Value>(idx) {
        return SqlValue::String(v.to_string());
    }
    SqlValue::Null(SqlNullType::String)
}

/// Certificate verifier that accepts any certificate.
///
/// Used only for `ssl_mode=require`, which encrypts the connection without
/// verifying the server identity. Use `verify-full` where MITM is a concern.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_filter_reserved_prefixes() {
        let tables = vec![
            "patients".to_string(),
            "stg_patients".to_string(),
            "int_visits".to_string(),
            "orders".to_string(),
            "integration".to_string(),
        ];
        let prefixes = vec!["stg_".to_string(), "int_".to_string()];
        let kept = filter_reserved(tables, &prefixes);
        assert_eq!(kept, vec!["patients", "orders", "integration"]);
    }

    #[test]
    fn test_filter_reserved_no_prefixes() {
        let tables = vec!["stg_x".to_string()];
        let kept = filter_reserved(tables.clone(), &[]);
        assert_eq!(kept, tables);
    }
}

//! Configuration type definitions.

use crate::transfer::TimestampRange;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (PostgreSQL).
    pub source: SourceConfig,

    /// Target database configuration (SQL Server).
    pub target: TargetConfig,

    /// Copy behavior configuration.
    #[serde(default)]
    pub copy: CopyConfig,
}

/// Source database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Source schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

/// Target database (SQL Server) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Target schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

// Passwords must never reach log output through {:?}.
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Copy behavior configuration.
/// Option<T> fields distinguish "not set" (use default) from "explicitly set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Number of parallel table workers (default: 40).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Table name prefixes to exclude from enumeration (default: stg_, int_).
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Earliest year the destination accepts in datetime columns (default: 1753).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_min_year: Option<i32>,

    /// Latest year the destination accepts in datetime columns (default: 9999).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_max_year: Option<i32>,

    /// Maximum source connections (default: workers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Maximum target connections (default: workers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            workers: None,
            skip_prefixes: default_skip_prefixes(),
            timestamp_min_year: None,
            timestamp_max_year: None,
            max_source_connections: None,
            max_target_connections: None,
        }
    }
}

impl CopyConfig {
    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(40)
    }

    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections.unwrap_or_else(|| self.get_workers())
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections.unwrap_or_else(|| self.get_workers())
    }

    /// Effective datetime bounds for the destination.
    pub fn timestamp_range(&self) -> TimestampRange {
        TimestampRange {
            min_year: self.timestamp_min_year.unwrap_or(1753),
            max_year: self.timestamp_max_year.unwrap_or(9999),
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_skip_prefixes() -> Vec<String> {
    vec!["stg_".to_string(), "int_".to_string()]
}

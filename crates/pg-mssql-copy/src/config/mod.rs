//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{CopyError, Result};
use std::env;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the PG_* / SQL_* environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Config {
            source: SourceConfig {
                host: require_env("PG_HOST")?,
                port: optional_env("PG_PORT")
                    .map(|v| v.parse())
                    .transpose()
                    .map_err(|e| CopyError::Config(format!("PG_PORT: {e}")))?
                    .unwrap_or(5432),
                database: require_env("PG_DATABASE")?,
                user: require_env("PG_USER")?,
                password: require_env("PG_PASSWORD")?,
                schema: optional_env("PG_SCHEMA").unwrap_or_else(|| "public".to_string()),
                ssl_mode: optional_env("PG_SSL_MODE").unwrap_or_else(|| "require".to_string()),
            },
            target: TargetConfig {
                host: require_env("SQL_HOST")?,
                port: optional_env("SQL_PORT")
                    .map(|v| v.parse())
                    .transpose()
                    .map_err(|e| CopyError::Config(format!("SQL_PORT: {e}")))?
                    .unwrap_or(1433),
                database: require_env("SQL_DATABASE")?,
                user: require_env("SQL_USER")?,
                password: require_env("SQL_PASSWORD")?,
                schema: optional_env("SQL_SCHEMA").unwrap_or_else(|| "dbo".to_string()),
                encrypt: optional_env("SQL_ENCRYPT").unwrap_or_else(|| "true".to_string()),
                trust_server_cert: optional_env("SQL_TRUST_SERVER_CERT")
                    .map(|v| matches!(v.to_lowercase().as_str(), "true" | "yes" | "1"))
                    .unwrap_or(false),
            },
            copy: CopyConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| CopyError::Config(format!("{name} is not set")))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_minimal() {
        let yaml = r#"
source:
  host: pg.example.org
  database: leaf_scratch
  user: etl
  password: pw
  schema: curated_kawasaki_registry
target:
  host: sql.example.org
  database: LeafClinDB
  user: sa
  password: pw
  schema: kawasaki
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.port, 5432);
        assert_eq!(config.source.ssl_mode, "require");
        assert_eq!(config.target.port, 1433);
        assert_eq!(config.copy.get_workers(), 40);
        assert_eq!(config.copy.skip_prefixes, vec!["stg_", "int_"]);
        let range = config.copy.timestamp_range();
        assert_eq!(range.min_year, 1753);
        assert_eq!(range.max_year, 9999);
    }

    #[test]
    fn test_from_yaml_copy_overrides() {
        let yaml = r#"
source:
  host: pg.example.org
  database: db
  user: u
  password: p
target:
  host: sql.example.org
  database: db
  user: u
  password: p
copy:
  workers: 8
  timestamp_min_year: 1900
  skip_prefixes: ["tmp_"]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.copy.get_workers(), 8);
        assert_eq!(config.copy.timestamp_range().min_year, 1900);
        assert_eq!(config.copy.skip_prefixes, vec!["tmp_"]);
    }

    #[test]
    fn test_from_yaml_invalid() {
        assert!(Config::from_yaml("not: [valid").is_err());
    }
}

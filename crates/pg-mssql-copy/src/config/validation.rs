//! Configuration validation.

use super::Config;
use crate::error::{CopyError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(CopyError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(CopyError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(CopyError::Config("source.user is required".into()));
    }
    if config.source.schema.is_empty() {
        return Err(CopyError::Config("source.schema is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(CopyError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(CopyError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(CopyError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(CopyError::Config("target.schema is required".into()));
    }

    // Copy config validation - only check if explicitly set
    if let Some(0) = config.copy.workers {
        return Err(CopyError::Config("copy.workers must be at least 1".into()));
    }

    let range = config.copy.timestamp_range();
    if range.min_year > range.max_year {
        return Err(CopyError::Config(format!(
            "copy.timestamp_min_year ({}) must not exceed copy.timestamp_max_year ({})",
            range.min_year, range.max_year
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CopyConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "leaf_scratch".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "curated_kawasaki_registry".to_string(),
                ssl_mode: "disable".to_string(),
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 1433,
                database: "LeafClinDB".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                schema: "kawasaki".to_string(),
                encrypt: "false".to_string(),
                trust_server_cert: true,
            },
            copy: CopyConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_database() {
        let mut config = valid_config();
        config.target.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = valid_config();
        config.copy.workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_inverted_timestamp_range_rejected() {
        let mut config = valid_config();
        config.copy.timestamp_min_year = Some(2000);
        config.copy.timestamp_max_year = Some(1990);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}

//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::error::{DiffError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("destination", &config.destination)?;

    // Comparing a table with itself proves nothing
    if config.source.host == config.destination.host
        && config.source.port == config.destination.port
        && config.source.database == config.destination.database
        && config.source.table == config.destination.table
    {
        return Err(DiffError::Config(
            "source and destination cannot be the same table".into(),
        ));
    }

    if config.check.chunk_size == 0 {
        return Err(DiffError::Config(
            "check.chunk_size must be at least 1".into(),
        ));
    }
    if config.check.threads == 0 {
        return Err(DiffError::Config("check.threads must be at least 1".into()));
    }

    let mut seen = HashSet::new();
    for column in &config.check.columns {
        if column.trim().is_empty() {
            return Err(DiffError::Config(
                "check.columns must not contain empty names".into(),
            ));
        }
        if !seen.insert(column.as_str()) {
            return Err(DiffError::Config(format!(
                "check.columns lists '{}' more than once",
                column
            )));
        }
    }

    if let Some(filter) = &config.check.row_filter {
        if filter.trim().is_empty() {
            return Err(DiffError::Config(
                "check.where must not be blank when set".into(),
            ));
        }
    }

    if config.repair.max_keys == 0 {
        return Err(DiffError::Config(
            "repair.max_keys must be at least 1".into(),
        ));
    }
    if config.repair.batch_size == 0 {
        return Err(DiffError::Config(
            "repair.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_database(side: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(DiffError::Config(format!("{}.host is required", side)));
    }
    if db.user.is_empty() {
        return Err(DiffError::Config(format!("{}.user is required", side)));
    }
    if db.database.is_empty() {
        return Err(DiffError::Config(format!("{}.database is required", side)));
    }
    if db.table.is_empty() {
        return Err(DiffError::Config(format!("{}.table is required", side)));
    }
    if let Some(0) = db.max_connections {
        return Err(DiffError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CheckConfig, RepairConfig};

    fn database(host: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: host.to_string(),
            port: 3306,
            user: "checker".to_string(),
            password: "password".to_string(),
            database: "shop".to_string(),
            table: "orders".to_string(),
            max_connections: None,
        }
    }

    fn valid_config() -> Config {
        Config {
            source: database("10.0.0.1"),
            destination: database("10.0.0.2"),
            check: CheckConfig::default(),
            repair: RepairConfig::default(),
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
    fn test_missing_destination_table() {
        let mut config = valid_config();
        config.destination.table = "".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("destination.table"));
    }

    #[test]
    fn test_same_table_rejected() {
        let mut config = valid_config();
        config.destination.host = config.source.host.clone();
        assert!(validate(&config).is_err());

        // Same server, different table is fine
        config.destination.table = "orders_copy".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_chunk_size_and_threads() {
        let mut config = valid_config();
        config.check.chunk_size = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.check.threads = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut config = valid_config();
        config.check.columns = vec!["id".into(), "name".into(), "id".into()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_blank_filter_rejected() {
        let mut config = valid_config();
        config.check.row_filter = Some("   ".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_repair_limits() {
        let mut config = valid_config();
        config.repair.max_keys = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.repair.batch_size = 0;
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
}

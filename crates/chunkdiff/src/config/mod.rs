//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
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

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl DatabaseConfig {
    /// Human readable `host:port/database.table` label (no credentials).
    pub fn label(&self) -> String {
        format!("{}:{}/{}.{}", self.host, self.port, self.database, self.table)
    }

    /// Pool size to use when none is configured.
    pub fn pool_size(&self, threads: usize) -> u32 {
        self.max_connections
            .unwrap_or_else(|| (threads + 2).min(u32::MAX as usize) as u32)
    }
}

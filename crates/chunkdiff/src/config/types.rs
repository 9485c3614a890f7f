//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Table holding the reference data.
    pub source: DatabaseConfig,

    /// Table being verified against the source.
    pub destination: DatabaseConfig,

    /// Chunking and comparison behaviour.
    #[serde(default)]
    pub check: CheckConfig,

    /// Repair script generation.
    #[serde(default)]
    pub repair: RepairConfig,
}

/// Connection settings and table name for one side of the comparison.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Database (schema) name.
    pub database: String,

    /// Table under test.
    pub table: String,

    /// Pool size. Defaults to `check.threads + 2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// How primary keys are distributed, which decides the chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Contiguous auto-increment keys: fixed-width key windows.
    #[default]
    AutoIncrement,

    /// Arbitrary keys: boundaries discovered by row offset on both tables.
    Sparse,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::AutoIncrement => write!(f, "auto_increment"),
            KeyMode::Sparse => write!(f, "sparse"),
        }
    }
}

/// Which checksum formula to run inside the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmChoice {
    /// CRC32 when either side is TiDB, MD5 otherwise.
    #[default]
    Auto,

    /// Always use the CRC32 formula.
    Simple,

    /// Always use the MD5 formula.
    Precise,
}

/// Chunking and comparison configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Rows per chunk (default: 500).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Row-level reconciliation workers (default: 20).
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Key distribution (default: auto_increment).
    #[serde(default)]
    pub key_mode: KeyMode,

    /// Explicit column projection. Empty means every column.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Auxiliary row filter, a SQL boolean expression.
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub row_filter: Option<String>,

    /// Checksum formula (default: auto).
    #[serde(default)]
    pub algorithm: AlgorithmChoice,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            threads: default_threads(),
            key_mode: KeyMode::default(),
            columns: Vec::new(),
            row_filter: None,
            algorithm: AlgorithmChoice::default(),
        }
    }
}

/// Repair script configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Write a repair script after the pass (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// Path to the mysqldump binary.
    #[serde(default = "default_mysqldump")]
    pub mysqldump: PathBuf,

    /// File the repair statements are appended to.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Refuse to act when any divergence list is longer than this.
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,

    /// Keys per mysqldump invocation.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mysqldump: default_mysqldump(),
            output: default_output(),
            max_keys: default_max_keys(),
            batch_size: default_batch_size(),
        }
    }
}

// Default value functions for serde
fn default_mysql_port() -> u16 {
    3306
}

fn default_chunk_size() -> usize {
    500
}

fn default_threads() -> usize {
    20
}

fn default_mysqldump() -> PathBuf {
    PathBuf::from("/usr/local/mysql/bin/mysqldump")
}

fn default_output() -> PathBuf {
    PathBuf::from("./dump.sql")
}

fn default_max_keys() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    100
}

//! Error types for the table diff library.

use thiserror::Error;

/// Main error type for diff operations.
#[derive(Error, Debug)]
pub enum DiffError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database could not be reached
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Source and destination disagree on the compared columns
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Table has no primary key (chunking needs one)
    #[error("Table {0} has no primary key - chunked verification requires one")]
    NoPrimaryKey(String),

    /// Primary key shape the chunk planner cannot handle
    #[error("Table {table} has an unsupported primary key: {reason}")]
    UnsupportedKey { table: String, reason: String },

    /// A single query against one of the tables failed
    #[error("Query failed ({context}): {message}")]
    Query { context: String, message: String },

    /// Repair script generation refused to run
    #[error("Refusing to write repair script: {list} list has {count} keys (limit {limit})")]
    RepairRefused {
        list: &'static str,
        count: usize,
        limit: usize,
    },

    /// Repair script generation failed
    #[error("Repair script failed: {0}")]
    Repair(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiffError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        DiffError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Query error
    pub fn query(context: impl Into<String>, message: impl ToString) -> Self {
        DiffError::Query {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            DiffError::Config(_) | DiffError::Yaml(_) => 1,
            DiffError::Connection { .. } => 2,
            DiffError::SchemaMismatch(_)
            | DiffError::NoPrimaryKey(_)
            | DiffError::UnsupportedKey { .. } => 3,
            DiffError::Query { .. } => 4,
            DiffError::RepairRefused { .. } | DiffError::Repair(_) => 5,
            DiffError::Json(_) => 6,
            DiffError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;

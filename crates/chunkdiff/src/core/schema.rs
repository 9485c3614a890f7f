//! Table identity, column projection, and key-range types.
//!
//! These types are shared by every backend and by the diff engine. They carry
//! no connection state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::KeyMode;
use crate::error::{DiffError, Result};

/// How a column participates in the precise fingerprint.
///
/// Resolved once from the catalog type name when the projection is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Short character data, converted to a canonical wide encoding.
    NarrowText,
    /// TEXT/BLOB/JSON data, replaced by a 32-bit hash of its bytes.
    LargeObject,
    /// Everything else, concatenated as the engine renders it.
    Other,
}

impl ColumnKind {
    /// Classify a MySQL `DATA_TYPE` value.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_lowercase().as_str() {
            "char" | "varchar" | "tinytext" | "enum" | "set" => ColumnKind::NarrowText,
            "text" | "mediumtext" | "longtext" | "tinyblob" | "blob" | "mediumblob"
            | "longblob" | "json" => ColumnKind::LargeObject,
            _ => ColumnKind::Other,
        }
    }
}

/// A column in the comparison projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Catalog data type (e.g., "varchar", "bigint").
    pub data_type: String,
    /// Fingerprint treatment derived from `data_type`.
    pub kind: ColumnKind,
}

impl Column {
    /// Create a column, classifying its type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        let kind = ColumnKind::from_data_type(&data_type);
        Self {
            name: name.into(),
            data_type,
            kind,
        }
    }
}

/// Check that two projections list the same columns in the same order.
pub fn ensure_same_projection(source: &[Column], destination: &[Column]) -> Result<()> {
    if source.is_empty() {
        return Err(DiffError::SchemaMismatch(
            "source projection has no columns".to_string(),
        ));
    }
    let source_names: Vec<&str> = source.iter().map(|c| c.name.as_str()).collect();
    let dest_names: Vec<&str> = destination.iter().map(|c| c.name.as_str()).collect();

    if source_names != dest_names {
        return Err(DiffError::SchemaMismatch(format!(
            "source columns [{}] differ from destination columns [{}]",
            source_names.join(", "),
            dest_names.join(", ")
        )));
    }
    Ok(())
}

/// Identity of one table under test.
///
/// Everything except the primary key is fixed at construction; the key is
/// bound once after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentity {
    /// Database (schema) name.
    pub database: String,
    /// Table name.
    pub table: String,
    /// Primary-key column, `None` until discovered.
    pub primary_key: Option<String>,
    /// Explicit column projection, empty for all columns.
    pub columns: Vec<String>,
    /// Auxiliary row filter (SQL boolean expression).
    pub row_filter: Option<String>,
    /// Key distribution of this pass.
    pub key_mode: KeyMode,
}

impl TableIdentity {
    /// Create an identity with no filters and an unbound primary key.
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            primary_key: None,
            columns: Vec::new(),
            row_filter: None,
            key_mode: KeyMode::default(),
        }
    }

    /// Restrict the projection to the given columns.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    /// Set the auxiliary row filter.
    pub fn with_row_filter(mut self, filter: Option<String>) -> Self {
        self.row_filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    /// Set the key mode.
    pub fn with_key_mode(mut self, key_mode: KeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }

    /// Bind the primary key column.
    pub fn with_primary_key(mut self, pk: impl Into<String>) -> Self {
        self.primary_key = Some(pk.into());
        self
    }

    /// `database.table` for log messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// The bound primary key column.
    pub fn primary_key(&self) -> Result<&str> {
        self.primary_key
            .as_deref()
            .ok_or_else(|| DiffError::NoPrimaryKey(self.qualified_name()))
    }

    /// Row filter to AND into per-range queries.
    ///
    /// Auto-increment windows are already disjoint and exhaustive, so the
    /// filter is only applied to ranges in sparse mode.
    pub fn range_filter(&self) -> Option<&str> {
        match self.key_mode {
            KeyMode::Sparse => self.row_filter.as_deref(),
            KeyMode::AutoIncrement => None,
        }
    }
}

/// Half-open interval `[start, end)` over the primary-key domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// First key in the range (inclusive).
    pub start: i64,
    /// First key after the range (exclusive).
    pub end: i64,
}

impl KeyRange {
    /// Create a range. `start` must not exceed `end`.
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start <= end, "KeyRange start {} > end {}", start, end);
        Self { start, end }
    }

    /// Whether the range can hold no key at all.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Inclusive key bounds of the rows present in one or both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBounds {
    /// Smallest key present.
    pub min: i64,
    /// Largest key present.
    pub max: i64,
}

impl KeyBounds {
    /// Bounds of one table, or `None` when it has no rows.
    ///
    /// `min_max_key` reports `(0, 0)` for an empty table, so the row count
    /// decides whether the pair is real.
    pub fn from_extent(row_count: i64, min_max: (i64, i64)) -> Option<Self> {
        if row_count <= 0 {
            return None;
        }
        let (min, max) = min_max;
        Some(Self {
            min: min.min(max),
            max: min.max(max),
        })
    }

    /// Union of two tables' bounds.
    pub fn union(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(Self {
                min: a.min.min(b.min),
                max: a.max.max(b.max),
            }),
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        }
    }
}

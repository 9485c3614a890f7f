//! In-memory table backend.
//!
//! Holds rows in a `BTreeMap` keyed by primary key and computes fingerprints
//! and signatures with the in-process formulas from
//! [`crate::verify::fingerprint`], so it produces the same strings a MySQL
//! server would for the same values. Used as the database double in tests and
//! for dry experiments without a server.
//!
//! The row filter is not evaluated here; every stored row is visible.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;

use crate::core::schema::{Column, KeyRange, TableIdentity};
use crate::core::traits::TableSnapshot;
use crate::error::{DiffError, Result};
use crate::verify::fingerprint::{
    row_signature, Fingerprint, FingerprintAccumulator, FingerprintAlgorithm,
};
use crate::verify::types::RowFingerprint;

/// A table held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    identity: TableIdentity,
    columns: Vec<Column>,
    rows: BTreeMap<i64, Vec<Option<String>>>,
    aggregate_engine: bool,
    failing_fingerprints: HashSet<i64>,
    failing_signatures: HashSet<i64>,
}

impl MemoryTable {
    /// Create an empty table with the given column catalog.
    pub fn new(identity: TableIdentity, columns: Vec<Column>) -> Self {
        Self {
            identity,
            columns,
            rows: BTreeMap::new(),
            aggregate_engine: false,
            failing_fingerprints: HashSet::new(),
            failing_signatures: HashSet::new(),
        }
    }

    /// Insert or replace one row. `values` follow the column catalog.
    pub fn insert(&mut self, key: i64, values: Vec<Option<String>>) {
        self.rows.insert(key, values);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_row(mut self, key: i64, values: Vec<Option<String>>) -> Self {
        self.insert(key, values);
        self
    }

    /// Remove one row.
    pub fn remove(&mut self, key: i64) -> Option<Vec<Option<String>>> {
        self.rows.remove(&key)
    }

    /// Report as the distributed engine variant.
    pub fn with_aggregate_engine(mut self, aggregate: bool) -> Self {
        self.aggregate_engine = aggregate;
        self
    }

    /// Fail every fingerprint query whose range starts at `start`.
    pub fn fail_fingerprint_at(mut self, start: i64) -> Self {
        self.failing_fingerprints.insert(start);
        self
    }

    /// Fail every signature query whose range starts at `start`.
    pub fn fail_signatures_at(mut self, start: i64) -> Self {
        self.failing_signatures.insert(start);
        self
    }

    fn column_indexes(&self, projection: &[Column]) -> Result<Vec<usize>> {
        projection
            .iter()
            .map(|column| {
                self.columns
                    .iter()
                    .position(|c| c.name == column.name)
                    .ok_or_else(|| {
                        DiffError::SchemaMismatch(format!(
                            "column {} not found in {}",
                            column.name,
                            self.identity.qualified_name()
                        ))
                    })
            })
            .collect()
    }

    fn project(values: &[Option<String>], indexes: &[usize]) -> Vec<Option<String>> {
        indexes
            .iter()
            .map(|&i| values.get(i).cloned().flatten())
            .collect()
    }

    fn rows_in(&self, range: &KeyRange) -> impl Iterator<Item = (&i64, &Vec<Option<String>>)> {
        let end = if range.is_empty() { range.start } else { range.end };
        self.rows.range(range.start..end)
    }
}

#[async_trait]
impl TableSnapshot for MemoryTable {
    fn identity(&self) -> &TableIdentity {
        &self.identity
    }

    async fn row_count(&self) -> Result<i64> {
        Ok(self.rows.len() as i64)
    }

    async fn min_max_key(&self) -> Result<(i64, i64)> {
        let min = self.rows.keys().next().copied().unwrap_or(0);
        let max = self.rows.keys().next_back().copied().unwrap_or(0);
        Ok((min, max))
    }

    async fn is_aggregate_engine(&self) -> bool {
        self.aggregate_engine
    }

    async fn offset_key(&self, from_key: i64, row_offset: u64) -> Result<i64> {
        let take = usize::try_from(row_offset)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        Ok(self
            .rows
            .range(from_key..)
            .take(take)
            .last()
            .map(|(key, _)| *key)
            .unwrap_or(from_key))
    }

    async fn column_projection(&self) -> Result<Vec<Column>> {
        if self.identity.columns.is_empty() {
            return Ok(self.columns.clone());
        }
        self.identity
            .columns
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .ok_or_else(|| {
                        DiffError::SchemaMismatch(format!(
                            "column {} not found in {}",
                            name,
                            self.identity.qualified_name()
                        ))
                    })
            })
            .collect()
    }

    async fn range_fingerprint(
        &self,
        projection: &[Column],
        range: &KeyRange,
        algorithm: FingerprintAlgorithm,
    ) -> Result<Fingerprint> {
        if self.failing_fingerprints.contains(&range.start) {
            return Err(DiffError::query(
                format!("fingerprint {} {}", self.identity.qualified_name(), range),
                "injected failure",
            ));
        }

        let indexes = self.column_indexes(projection)?;
        let mut acc = FingerprintAccumulator::new(algorithm);
        for (_, values) in self.rows_in(range) {
            acc.add_row(projection, &Self::project(values, &indexes));
        }
        Ok(acc.finish())
    }

    async fn range_signatures(
        &self,
        projection: &[Column],
        range: &KeyRange,
    ) -> Result<RowFingerprint> {
        if self.failing_signatures.contains(&range.start) {
            return Err(DiffError::query(
                format!("signatures {} {}", self.identity.qualified_name(), range),
                "injected failure",
            ));
        }

        let indexes = self.column_indexes(projection)?;
        Ok(self
            .rows_in(range)
            .map(|(key, values)| {
                (
                    key.to_string(),
                    row_signature(&Self::project(values, &indexes)),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MemoryTable {
        MemoryTable::new(
            TableIdentity::new("shop", "orders").with_primary_key("id"),
            vec![Column::new("id", "bigint"), Column::new("name", "varchar")],
        )
        .with_row(10, vec![Some("10".into()), Some("a".into())])
        .with_row(20, vec![Some("20".into()), None])
        .with_row(30, vec![Some("30".into()), Some("c".into())])
    }

    #[tokio::test]
    async fn test_bounds_and_count() {
        let t = table();
        assert_eq!(t.row_count().await.unwrap(), 3);
        assert_eq!(t.min_max_key().await.unwrap(), (10, 30));

        let empty = MemoryTable::new(TableIdentity::new("shop", "orders"), vec![]);
        assert_eq!(empty.min_max_key().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_offset_key_clamps() {
        let t = table();
        assert_eq!(t.offset_key(10, 0).await.unwrap(), 10);
        assert_eq!(t.offset_key(10, 1).await.unwrap(), 20);
        assert_eq!(t.offset_key(11, 1).await.unwrap(), 30);
        assert_eq!(t.offset_key(10, 99).await.unwrap(), 30);
        assert_eq!(t.offset_key(31, 5).await.unwrap(), 31);
    }

    #[tokio::test]
    async fn test_explicit_projection() {
        let mut t = table();
        t.identity = t.identity.clone().with_columns(vec!["name".into()]);
        let projection = t.column_projection().await.unwrap();
        assert_eq!(projection.len(), 1);
        assert_eq!(projection[0].name, "name");

        t.identity = t.identity.clone().with_columns(vec!["missing".into()]);
        assert!(matches!(
            t.column_projection().await,
            Err(DiffError::SchemaMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_signatures_in_range() {
        let t = table();
        let projection = t.column_projection().await.unwrap();
        let sigs = t
            .range_signatures(&projection, &KeyRange::new(10, 30))
            .await
            .unwrap();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs["10"], "10#a#00");
        assert_eq!(sigs["20"], "20#01");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let t = table().fail_fingerprint_at(10).fail_signatures_at(20);
        let projection = t.column_projection().await.unwrap();
        assert!(t
            .range_fingerprint(&projection, &KeyRange::new(10, 20), FingerprintAlgorithm::Simple)
            .await
            .is_err());
        assert!(t
            .range_signatures(&projection, &KeyRange::new(20, 30))
            .await
            .is_err());
        assert!(t
            .range_signatures(&projection, &KeyRange::new(10, 20))
            .await
            .is_ok());
    }
}

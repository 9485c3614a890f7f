//! The query surface the diff engine needs from one table.
//!
//! [`TableSnapshot`] is implemented by the MySQL/TiDB driver for real runs and
//! by the in-memory driver for tests. The engine only ever talks to
//! `Arc<dyn TableSnapshot>`, so the planner, scheduler, and reconciler never
//! see SQL or connections.

use async_trait::async_trait;

use crate::error::Result;
use crate::verify::fingerprint::{Fingerprint, FingerprintAlgorithm};
use crate::verify::types::RowFingerprint;

use super::schema::{Column, KeyRange, TableIdentity};

/// Metadata and query surface for one table under test.
///
/// # Thread Safety
///
/// Implementations are shared by the scanning loop and every reconciliation
/// worker, so each call must check out its own connection (or otherwise be
/// safe for concurrent callers).
#[async_trait]
pub trait TableSnapshot: Send + Sync {
    /// Identity of the table, including the bound primary key.
    fn identity(&self) -> &TableIdentity;

    /// Count of rows matching the row filter.
    async fn row_count(&self) -> Result<i64>;

    /// Smallest and largest key under the row filter.
    ///
    /// Returns `(0, 0)` for an empty table; combine with [`row_count`] before
    /// treating the pair as real keys.
    ///
    /// [`row_count`]: TableSnapshot::row_count
    async fn min_max_key(&self) -> Result<(i64, i64)>;

    /// Whether the backing engine is the distributed (TiDB) variant.
    ///
    /// Best effort: a failed probe reports `false`.
    async fn is_aggregate_engine(&self) -> bool;

    /// Key of the row `row_offset` positions after `from_key` (inclusive,
    /// zero-based, ordered by key).
    ///
    /// Clamps to the last available row when fewer rows remain, and returns
    /// `from_key` when none remain.
    async fn offset_key(&self, from_key: i64, row_offset: u64) -> Result<i64>;

    /// Columns that take part in fingerprinting, in a stable order.
    async fn column_projection(&self) -> Result<Vec<Column>>;

    /// Aggregate checksum of every row in `range`.
    ///
    /// Zero matching rows yields [`Fingerprint::empty`], not an error.
    async fn range_fingerprint(
        &self,
        projection: &[Column],
        range: &KeyRange,
        algorithm: FingerprintAlgorithm,
    ) -> Result<Fingerprint>;

    /// One delimiter-joined signature per row in `range`, keyed by primary key.
    async fn range_signatures(
        &self,
        projection: &[Column],
        range: &KeyRange,
    ) -> Result<RowFingerprint>;
}

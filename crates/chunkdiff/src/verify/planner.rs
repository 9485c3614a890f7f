//! Chunk planning over the primary-key domain.
//!
//! Two strategies produce the same shape of plan: strictly increasing,
//! adjacent, half-open ranges that together cover `[min, max]` of the union of
//! both tables' keys.
//!
//! - **Dense** (`auto_increment`): fixed-width windows. No queries.
//! - **Sparse**: boundaries placed every `chunk_size` rows, probing both
//!   tables and taking the larger key so chunk ends agree on both sides.

use tracing::debug;

use crate::config::KeyMode;
use crate::core::schema::{KeyBounds, KeyRange};
use crate::core::traits::TableSnapshot;
use crate::error::{DiffError, Result};

/// Build the chunk plan for one pass.
pub async fn plan_chunks(
    key_mode: KeyMode,
    source: &dyn TableSnapshot,
    destination: &dyn TableSnapshot,
    bounds: Option<KeyBounds>,
    chunk_size: u64,
) -> Result<Vec<KeyRange>> {
    let Some(bounds) = bounds else {
        return Ok(Vec::new());
    };
    if chunk_size == 0 {
        return Err(DiffError::Config("chunk_size must be at least 1".into()));
    }
    let upper = exclusive_upper(source, bounds)?;

    match key_mode {
        KeyMode::AutoIncrement => Ok(dense_ranges(bounds.min, upper, chunk_size)),
        KeyMode::Sparse => sparse_ranges(source, destination, bounds.min, upper, chunk_size).await,
    }
}

fn exclusive_upper(source: &dyn TableSnapshot, bounds: KeyBounds) -> Result<i64> {
    bounds
        .max
        .checked_add(1)
        .ok_or_else(|| DiffError::UnsupportedKey {
            table: source.identity().qualified_name(),
            reason: format!("key {} leaves no room for an exclusive range end", bounds.max),
        })
}

/// Fixed-width windows from `min` until `upper` is reached.
///
/// The last window keeps its full width and may extend past `upper`.
pub fn dense_ranges(min: i64, upper: i64, chunk_size: u64) -> Vec<KeyRange> {
    let width = i64::try_from(chunk_size).unwrap_or(i64::MAX);
    let mut ranges = Vec::new();
    let mut start = min;

    while start < upper {
        let end = start.saturating_add(width);
        ranges.push(KeyRange::new(start, end));
        if end == start {
            break;
        }
        start = end;
    }

    ranges
}

/// Row-count-based boundaries probed on both tables.
pub async fn sparse_ranges(
    source: &dyn TableSnapshot,
    destination: &dyn TableSnapshot,
    min: i64,
    upper: i64,
    chunk_size: u64,
) -> Result<Vec<KeyRange>> {
    let mut ranges = Vec::new();
    let mut offset = min;

    while offset < upper {
        let source_key = source.offset_key(offset, chunk_size).await?;
        let dest_key = destination.offset_key(offset, chunk_size).await?;

        let mut boundary = source_key.max(dest_key);
        if boundary <= offset {
            boundary = upper;
        }
        let boundary = boundary.min(upper);

        debug!(
            "sparse boundary from {}: source {}, destination {}, using {}",
            offset, source_key, dest_key, boundary
        );
        ranges.push(KeyRange::new(offset, boundary));
        offset = boundary;
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{Column, TableIdentity};
    use crate::drivers::memory::MemoryTable;

    fn table(keys: &[i64]) -> MemoryTable {
        let mut t = MemoryTable::new(
            TableIdentity::new("shop", "orders").with_primary_key("id"),
            vec![Column::new("id", "bigint")],
        );
        for &k in keys {
            t.insert(k, vec![Some(k.to_string())]);
        }
        t
    }

    async fn bounds(a: &MemoryTable, b: &MemoryTable) -> Option<KeyBounds> {
        KeyBounds::union(
            KeyBounds::from_extent(a.row_count().await.unwrap(), a.min_max_key().await.unwrap()),
            KeyBounds::from_extent(b.row_count().await.unwrap(), b.min_max_key().await.unwrap()),
        )
    }

    fn assert_adjacent_cover(ranges: &[KeyRange], min: i64, max: i64) {
        assert_eq!(ranges.first().unwrap().start, min);
        assert!(ranges.last().unwrap().end > max);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_dense_windows() {
        let ranges = dense_ranges(1, 1201, 500);
        assert_eq!(
            ranges,
            vec![
                KeyRange::new(1, 501),
                KeyRange::new(501, 1001),
                KeyRange::new(1001, 1501),
            ]
        );
    }

    #[test]
    fn test_dense_single_key() {
        assert_eq!(dense_ranges(7, 8, 500), vec![KeyRange::new(7, 507)]);
    }

    #[tokio::test]
    async fn test_dense_plan_from_bounds() {
        let src = table(&[1, 600, 1200]);
        let dst = table(&[1, 1200]);
        let b = bounds(&src, &dst).await;
        let ranges = plan_chunks(KeyMode::AutoIncrement, &src, &dst, b, 500)
            .await
            .unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges.last().unwrap().end, 1501);
        assert_adjacent_cover(&ranges, 1, 1200);
    }

    #[tokio::test]
    async fn test_empty_tables_plan_nothing() {
        let src = table(&[]);
        let dst = table(&[]);
        let b = bounds(&src, &dst).await;
        assert_eq!(b, None);
        for mode in [KeyMode::AutoIncrement, KeyMode::Sparse] {
            let ranges = plan_chunks(mode, &src, &dst, b, 10).await.unwrap();
            assert!(ranges.is_empty());
        }
    }

    #[tokio::test]
    async fn test_sparse_covers_union_and_ends_at_upper() {
        let src = table(&[5, 6, 7, 100, 101, 5000, 9000]);
        let dst = table(&[3, 6, 120, 9100]);
        let b = bounds(&src, &dst).await;
        let ranges = plan_chunks(KeyMode::Sparse, &src, &dst, b, 2)
            .await
            .unwrap();

        assert_adjacent_cover(&ranges, 3, 9100);
        assert_eq!(ranges.last().unwrap().end, 9101);
        assert!(ranges.iter().all(|r| !r.is_empty()));
    }

    #[tokio::test]
    async fn test_sparse_boundaries_are_symmetric() {
        let a = table(&[1, 2, 3, 10, 11, 40, 41, 42, 43, 99]);
        let b = table(&[2, 5, 6, 7, 8, 30, 99, 150]);
        let bnds = bounds(&a, &b).await;

        let forward = plan_chunks(KeyMode::Sparse, &a, &b, bnds, 3).await.unwrap();
        let backward = plan_chunks(KeyMode::Sparse, &b, &a, bnds, 3).await.unwrap();
        assert_eq!(forward, backward);
    }

    #[tokio::test]
    async fn test_sparse_single_row() {
        let src = table(&[42]);
        let dst = table(&[]);
        let b = bounds(&src, &dst).await;
        let ranges = plan_chunks(KeyMode::Sparse, &src, &dst, b, 100)
            .await
            .unwrap();
        assert_eq!(ranges, vec![KeyRange::new(42, 43)]);
    }

    #[tokio::test]
    async fn test_max_key_rejected() {
        let src = table(&[i64::MAX]);
        let dst = table(&[]);
        let b = bounds(&src, &dst).await;
        let err = plan_chunks(KeyMode::AutoIncrement, &src, &dst, b, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DiffError::UnsupportedKey { .. }));
    }
}

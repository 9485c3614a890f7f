//! Row-level reconciliation of one mismatched chunk.

use tracing::debug;

use crate::core::schema::{Column, KeyRange};
use crate::core::traits::TableSnapshot;
use crate::error::Result;

use super::types::{ChunkDivergence, DivergenceSets, RowFingerprint};

/// Classify every key of one chunk by comparing row signatures.
///
/// Signatures are compared as exact strings. Output lists are sorted by key
/// so results do not depend on hash-map iteration order.
pub fn diff_signatures(source: &RowFingerprint, destination: &RowFingerprint) -> ChunkDivergence {
    let mut diff = ChunkDivergence::default();

    // Rows in the source but not the destination (INSERT), or with a
    // different signature (UPDATE).
    for (key, source_sig) in source {
        match destination.get(key) {
            None => diff.missing_in_dest.push(key.clone()),
            Some(dest_sig) if dest_sig != source_sig => diff.value_mismatch.push(key.clone()),
            _ => {}
        }
    }

    // Rows in the destination but not the source (DELETE)
    for key in destination.keys() {
        if !source.contains_key(key) {
            diff.missing_in_source.push(key.clone());
        }
    }

    sort_keys(&mut diff.missing_in_dest);
    sort_keys(&mut diff.value_mismatch);
    sort_keys(&mut diff.missing_in_source);
    diff
}

fn sort_keys(keys: &mut [String]) {
    keys.sort_by_key(|k| k.parse::<i64>().unwrap_or(i64::MAX));
}

/// Fetch signatures for `range` on both tables (source first), diff them, and
/// append the result to `sets`.
///
/// Nothing is recorded when either fetch fails.
pub async fn reconcile_chunk(
    source: &dyn TableSnapshot,
    destination: &dyn TableSnapshot,
    projection: &[Column],
    range: &KeyRange,
    sets: &DivergenceSets,
) -> Result<ChunkDivergence> {
    let source_rows = source.range_signatures(projection, range).await?;
    let dest_rows = destination.range_signatures(projection, range).await?;

    let diff = diff_signatures(&source_rows, &dest_rows);
    if !diff.has_differences() {
        debug!(
            "chunk {}: {} rows, fingerprints differed but rows agree",
            range,
            source_rows.len()
        );
        return Ok(diff);
    }

    debug!(
        "chunk {}: {} differences (inserts {:?}, updates {:?}, deletes {:?})",
        range,
        diff.total_differences(),
        diff.missing_in_dest,
        diff.value_mismatch,
        diff.missing_in_source
    );

    sets.record(&diff);
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableIdentity;
    use crate::drivers::memory::MemoryTable;

    fn signatures(rows: &[(&str, &str)]) -> RowFingerprint {
        rows.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn table(rows: &[(i64, &str)]) -> MemoryTable {
        let mut t = MemoryTable::new(
            TableIdentity::new("shop", "orders").with_primary_key("id"),
            vec![Column::new("id", "bigint"), Column::new("v", "varchar")],
        );
        for (k, v) in rows {
            t.insert(*k, vec![Some(k.to_string()), Some(v.to_string())]);
        }
        t
    }

    #[test]
    fn test_diff_classifies_keys() {
        let source = signatures(&[("1", "a"), ("2", "b"), ("3", "c")]);
        let destination = signatures(&[("1", "a"), ("2", "x"), ("4", "d")]);
        let diff = diff_signatures(&source, &destination);

        assert_eq!(diff.missing_in_dest, vec!["3"]);
        assert_eq!(diff.value_mismatch, vec!["2"]);
        assert_eq!(diff.missing_in_source, vec!["4"]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let rows = signatures(&[("1", "a"), ("2", "b")]);
        assert!(!diff_signatures(&rows, &rows.clone()).has_differences());
    }

    #[test]
    fn test_diff_sorts_numerically() {
        let source = signatures(&[("10", "a"), ("9", "a"), ("100", "a")]);
        let diff = diff_signatures(&source, &RowFingerprint::new());
        assert_eq!(diff.missing_in_dest, vec!["9", "10", "100"]);
    }

    #[tokio::test]
    async fn test_reconcile_chunk_records_sets() {
        let src = table(&[(1, "a"), (2, "b"), (3, "c")]);
        let dst = table(&[(1, "a"), (2, "x"), (4, "d")]);
        let projection = src.column_projection().await.unwrap();
        let sets = DivergenceSets::new();

        let diff = reconcile_chunk(&src, &dst, &projection, &KeyRange::new(1, 5), &sets)
            .await
            .unwrap();
        assert_eq!(diff.total_differences(), 3);
        assert_eq!(sets.insert_keys(), vec!["3"]);
        assert_eq!(sets.update_keys(), vec!["2"]);
        assert_eq!(sets.delete_keys(), vec!["4"]);
    }

    #[tokio::test]
    async fn test_reconcile_failure_records_nothing() {
        let src = table(&[(1, "a"), (2, "b")]);
        let dst = table(&[(1, "z")]).fail_signatures_at(1);
        let projection = src.column_projection().await.unwrap();
        let sets = DivergenceSets::new();

        let result = reconcile_chunk(&src, &dst, &projection, &KeyRange::new(1, 3), &sets).await;
        assert!(result.is_err());
        assert!(sets.snapshot().is_empty());
    }
}

//! Chunked checksum verification between two tables.
//!
//! A pass runs in three stages:
//!
//! - **Plan**: resolve and compare the column projections, pick the checksum
//!   formula, and split the key domain into chunks ([`planner`])
//! - **Scan**: fingerprint every chunk on both tables in key order
//!   ([`fingerprint`]); chunks that differ, or that could not be
//!   fingerprinted, go to a bounded pool of reconciliation workers
//! - **Reconcile**: workers fetch per-row signatures for their chunk and
//!   record inserts, updates, and deletes into the shared
//!   [`DivergenceSets`] ([`reconcile`])
//!
//! Only chunks whose fingerprints differ ever ship rows over the network.

pub mod fingerprint;
pub mod hash_query;
pub mod planner;
pub mod reconcile;
pub mod types;

// Re-exports
pub use fingerprint::{ChunkCheck, Fingerprint, FingerprintAlgorithm, FingerprintEngine};
pub use types::{
    ChunkDivergence, DiffProgressUpdate, DiffReport, DivergenceReport, DivergenceSets, RowFingerprint,
    RunPhase, RunStatus,
};

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{CheckConfig, KeyMode};
use crate::core::schema::{ensure_same_projection, Column, KeyBounds, KeyRange};
use crate::core::traits::TableSnapshot;
use crate::error::Result;
use reconcile::reconcile_chunk;

/// Everything decided before the first chunk is fingerprinted.
#[derive(Debug, Clone, Serialize)]
pub struct DiffPlan {
    /// Columns compared on both tables.
    pub projection: Vec<Column>,
    /// Checksum formula.
    pub algorithm: FingerprintAlgorithm,
    /// Chunking strategy.
    pub key_mode: KeyMode,
    /// Rows in the source under the row filter.
    pub source_row_count: i64,
    /// Rows in the destination under the row filter.
    pub destination_row_count: i64,
    /// Union of both tables' key bounds, `None` when both are empty.
    pub bounds: Option<KeyBounds>,
    /// Chunks in scan order.
    pub chunks: Vec<KeyRange>,
}

/// Drives one verification pass over a source and destination table.
pub struct DiffScheduler {
    source: Arc<dyn TableSnapshot>,
    destination: Arc<dyn TableSnapshot>,
    config: CheckConfig,
    progress_tx: Option<mpsc::Sender<DiffProgressUpdate>>,
}

impl DiffScheduler {
    /// Create a scheduler for one pair of tables.
    pub fn new(
        source: Arc<dyn TableSnapshot>,
        destination: Arc<dyn TableSnapshot>,
        config: CheckConfig,
    ) -> Self {
        Self {
            source,
            destination,
            config,
            progress_tx: None,
        }
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<DiffProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Send progress update if channel is configured.
    async fn send_progress(&self, update: DiffProgressUpdate) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update).await;
        }
    }

    fn enter(&self, phase: RunPhase) {
        info!(
            "{}: {} phase",
            self.source.identity().qualified_name(),
            phase
        );
    }

    /// Resolve projection, algorithm, bounds, and chunks without scanning.
    pub async fn plan(&self) -> Result<DiffPlan> {
        let source_projection = self.source.column_projection().await?;
        let dest_projection = self.destination.column_projection().await?;
        ensure_same_projection(&source_projection, &dest_projection)?;

        let aggregate = self.source.is_aggregate_engine().await
            || self.destination.is_aggregate_engine().await;
        let algorithm = FingerprintAlgorithm::resolve(self.config.algorithm, aggregate);

        let source_row_count = self.source.row_count().await?;
        let destination_row_count = self.destination.row_count().await?;
        let source_bounds =
            KeyBounds::from_extent(source_row_count, self.source.min_max_key().await?);
        let dest_bounds =
            KeyBounds::from_extent(destination_row_count, self.destination.min_max_key().await?);
        let bounds = KeyBounds::union(source_bounds, dest_bounds);

        info!(
            "Source: {} rows {:?}, Destination: {} rows {:?}",
            source_row_count, source_bounds, destination_row_count, dest_bounds
        );

        let chunks = planner::plan_chunks(
            self.config.key_mode,
            self.source.as_ref(),
            self.destination.as_ref(),
            bounds,
            self.config.chunk_size as u64,
        )
        .await?;

        info!(
            "Planned {} {} chunks of {} using {} checksums over {} columns",
            chunks.len(),
            self.config.key_mode,
            self.config.chunk_size,
            algorithm,
            source_projection.len()
        );

        Ok(DiffPlan {
            projection: source_projection,
            algorithm,
            key_mode: self.config.key_mode,
            source_row_count,
            destination_row_count,
            bounds,
            chunks,
        })
    }

    /// Run a full pass, recording divergences into `sets`.
    ///
    /// Planning failures are returned as errors. Per-chunk failures are
    /// counted in the report instead. Cancellation stops new chunks from being
    /// scanned; chunks already handed to workers still finish.
    pub async fn run(
        &self,
        sets: Arc<DivergenceSets>,
        cancel: CancellationToken,
    ) -> Result<DiffReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let table_name = self.source.identity().qualified_name();

        info!(
            "Run {}: {} -> {}",
            run_id,
            table_name,
            self.destination.identity().qualified_name()
        );

        self.enter(RunPhase::Planning);
        let plan = self.plan().await?;
        let engine = FingerprintEngine::new(plan.algorithm, plan.projection.clone());
        let projection = Arc::new(plan.projection.clone());

        let threads = self.config.threads.max(1);
        let num_workers = threads.min(plan.chunks.len());
        let (chunk_tx, chunk_rx) = async_channel::bounded::<KeyRange>(threads);

        let mut worker_handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let chunk_rx = chunk_rx.clone();
            let source = Arc::clone(&self.source);
            let destination = Arc::clone(&self.destination);
            let projection = Arc::clone(&projection);
            let sets = Arc::clone(&sets);

            let handle = tokio::spawn(async move {
                let mut failures = 0usize;

                while let Ok(range) = chunk_rx.recv().await {
                    if let Err(e) = reconcile_chunk(
                        source.as_ref(),
                        destination.as_ref(),
                        &projection,
                        &range,
                        &sets,
                    )
                    .await
                    {
                        error!(
                            "Worker {}: reconciliation of chunk {} failed, keys dropped: {}",
                            worker_id, range, e
                        );
                        failures += 1;
                    }
                }

                failures
            });

            worker_handles.push(handle);
        }

        // Drop our copy of chunk_rx so the channel closes when all workers are done
        drop(chunk_rx);

        self.enter(RunPhase::Scanning);
        let chunks_total = plan.chunks.len();
        let mut chunks_scanned = 0usize;
        let mut chunks_mismatched = 0usize;
        let mut fingerprint_errors = 0usize;
        let mut cancelled = false;

        for range in &plan.chunks {
            if cancel.is_cancelled() {
                warn!(
                    "{}: cancelled after {}/{} chunks",
                    table_name, chunks_scanned, chunks_total
                );
                cancelled = true;
                break;
            }

            let check = engine
                .compare(self.source.as_ref(), self.destination.as_ref(), range)
                .await;
            chunks_scanned += 1;

            match &check {
                ChunkCheck::Match(fp) if fp.is_empty_range() => {
                    debug!("chunk {}: no rows on either side", range);
                }
                ChunkCheck::Match(fp) => {
                    debug!("chunk {}: match ({})", range, fp);
                }
                ChunkCheck::Mismatch {
                    source,
                    destination,
                } => {
                    debug!(
                        "chunk {}: mismatch (src: {}, dst: {})",
                        range, source, destination
                    );
                }
                ChunkCheck::Failed(e) => {
                    warn!(
                        "chunk {}: fingerprint failed, comparing rows instead: {}",
                        range, e
                    );
                    fingerprint_errors += 1;
                }
            }

            if check.needs_reconcile() {
                chunks_mismatched += 1;
                if chunk_tx.send(*range).await.is_err() {
                    // Workers have all exited
                    error!("{}: no reconciliation workers left", table_name);
                    break;
                }
            }

            self.send_progress(DiffProgressUpdate {
                table: table_name.clone(),
                chunks_total,
                chunks_scanned,
                mismatches_found: chunks_mismatched,
            })
            .await;
        }

        self.enter(RunPhase::Draining);
        drop(chunk_tx);

        let mut reconcile_errors = 0usize;
        for handle in worker_handles {
            match handle.await {
                Ok(failures) => reconcile_errors += failures,
                Err(e) => {
                    error!("Reconciliation worker panicked: {}", e);
                    reconcile_errors += 1;
                }
            }
        }

        let final_phase = if cancelled {
            RunPhase::Cancelled
        } else {
            RunPhase::Done
        };
        self.enter(final_phase);

        let report = DiffReport {
            run_id,
            source_table: table_name,
            destination_table: self.destination.identity().qualified_name(),
            started_at,
            completed_at: Utc::now(),
            algorithm: plan.algorithm,
            key_mode: plan.key_mode,
            source_row_count: plan.source_row_count,
            destination_row_count: plan.destination_row_count,
            chunks_planned: chunks_total,
            chunks_scanned,
            chunks_mismatched,
            fingerprint_errors,
            reconcile_errors,
            workers: num_workers,
            final_phase,
            rows_to_insert: sets.insert_keys().len(),
            rows_to_update: sets.update_keys().len(),
            rows_to_delete: sets.delete_keys().len(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "{}: {} - {}/{} chunks scanned, {} mismatched, {} inserts, {} updates, {} deletes",
            report.source_table,
            report.status(),
            report.chunks_scanned,
            report.chunks_planned,
            report.chunks_mismatched,
            report.rows_to_insert,
            report.rows_to_update,
            report.rows_to_delete
        );
        if fingerprint_errors > 0 || reconcile_errors > 0 {
            warn!(
                "{}: {} fingerprint errors, {} reconcile errors",
                report.source_table, fingerprint_errors, reconcile_errors
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::TableIdentity;
    use crate::drivers::memory::MemoryTable;
    use crate::error::DiffError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn columns() -> Vec<Column> {
        vec![Column::new("id", "bigint"), Column::new("v", "varchar")]
    }

    fn table(rows: &[(i64, &str)]) -> MemoryTable {
        let mut t = MemoryTable::new(
            TableIdentity::new("shop", "orders").with_primary_key("id"),
            columns(),
        );
        for (k, v) in rows {
            t.insert(*k, vec![Some(k.to_string()), Some(v.to_string())]);
        }
        t
    }

    fn config(chunk_size: usize, threads: usize) -> CheckConfig {
        CheckConfig {
            chunk_size,
            threads,
            ..Default::default()
        }
    }

    fn scheduler(src: MemoryTable, dst: MemoryTable, config: CheckConfig) -> DiffScheduler {
        DiffScheduler::new(Arc::new(src), Arc::new(dst), config)
    }

    async fn run(scheduler: &DiffScheduler) -> (DiffReport, DivergenceReport) {
        let sets = Arc::new(DivergenceSets::new());
        let report = scheduler
            .run(Arc::clone(&sets), CancellationToken::new())
            .await
            .unwrap();
        let mut snapshot = sets.snapshot();
        snapshot.insert.sort();
        snapshot.update.sort();
        snapshot.delete.sort();
        (report, snapshot)
    }

    /// Cancels a token once `range_fingerprint` has been called `after` times.
    struct CancellingTable {
        inner: MemoryTable,
        calls: AtomicUsize,
        after: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl TableSnapshot for CancellingTable {
        fn identity(&self) -> &TableIdentity {
            self.inner.identity()
        }
        async fn row_count(&self) -> Result<i64> {
            self.inner.row_count().await
        }
        async fn min_max_key(&self) -> Result<(i64, i64)> {
            self.inner.min_max_key().await
        }
        async fn is_aggregate_engine(&self) -> bool {
            false
        }
        async fn offset_key(&self, from_key: i64, row_offset: u64) -> Result<i64> {
            self.inner.offset_key(from_key, row_offset).await
        }
        async fn column_projection(&self) -> Result<Vec<Column>> {
            self.inner.column_projection().await
        }
        async fn range_fingerprint(
            &self,
            projection: &[Column],
            range: &KeyRange,
            algorithm: FingerprintAlgorithm,
        ) -> Result<Fingerprint> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.cancel.cancel();
            }
            self.inner.range_fingerprint(projection, range, algorithm).await
        }
        async fn range_signatures(
            &self,
            projection: &[Column],
            range: &KeyRange,
        ) -> Result<RowFingerprint> {
            self.inner.range_signatures(projection, range).await
        }
    }

    #[tokio::test]
    async fn test_identical_tables_in_sync() {
        let rows: Vec<(i64, &str)> = (1..=50).map(|k| (k, "same")).collect();
        let s = scheduler(table(&rows), table(&rows), config(7, 4));
        let (report, divergences) = run(&s).await;

        assert_eq!(report.chunks_planned, 8);
        assert_eq!(report.chunks_scanned, 8);
        assert_eq!(report.chunks_mismatched, 0);
        assert!(divergences.is_empty());
        assert_eq!(report.status(), RunStatus::InSync);
        assert_eq!(report.final_phase, RunPhase::Done);
        assert_eq!(report.algorithm, FingerprintAlgorithm::Precise);
    }

    #[tokio::test]
    async fn test_divergences_found() {
        let s = scheduler(
            table(&[(1, "a"), (2, "b"), (3, "c")]),
            table(&[(1, "a"), (2, "x"), (4, "d")]),
            config(2, 3),
        );
        let (report, divergences) = run(&s).await;

        assert_eq!(divergences.insert, vec!["3"]);
        assert_eq!(divergences.update, vec!["2"]);
        assert_eq!(divergences.delete, vec!["4"]);
        assert_eq!(report.rows_to_insert, 1);
        assert_eq!(report.status(), RunStatus::Diverged);
        assert_eq!(report.status().exit_code(), 8);
    }

    #[tokio::test]
    async fn test_two_runs_agree() {
        let src: Vec<(i64, &str)> = (1..=40).map(|k| (k, "v")).collect();
        let mut dst = table(&src);
        dst.insert(5, vec![Some("5".into()), Some("changed".into())]);
        dst.remove(17);
        dst.insert(90, vec![Some("90".into()), Some("extra".into())]);

        let mut cfg = config(6, 2);
        cfg.key_mode = KeyMode::Sparse;
        let s = scheduler(table(&src), dst, cfg);

        let (_, first) = run(&s).await;
        let (_, second) = run(&s).await;
        assert_eq!(first, second);
        assert_eq!(first.update, vec!["5"]);
        assert_eq!(first.insert, vec!["17"]);
        assert_eq!(first.delete, vec!["90"]);
    }

    #[tokio::test]
    async fn test_cancel_stops_scanning() {
        let src_rows: Vec<(i64, &str)> = (1..=10).map(|k| (k, "a")).collect();
        let dst_rows: Vec<(i64, &str)> = (1..=10).map(|k| (k, "b")).collect();
        let cancel = CancellationToken::new();
        let source = CancellingTable {
            inner: table(&src_rows),
            calls: AtomicUsize::new(0),
            after: 2,
            cancel: cancel.clone(),
        };
        let s = DiffScheduler::new(Arc::new(source), Arc::new(table(&dst_rows)), config(1, 4));

        let sets = Arc::new(DivergenceSets::new());
        let report = s.run(Arc::clone(&sets), cancel).await.unwrap();

        assert_eq!(report.chunks_planned, 10);
        assert_eq!(report.chunks_scanned, 2);
        assert!(sets.snapshot().total() <= 2);
        assert_eq!(report.final_phase, RunPhase::Cancelled);
        assert_eq!(report.status(), RunStatus::Cancelled);
        assert!(!report.status().is_clean());
    }

    #[tokio::test]
    async fn test_fingerprint_failure_escalates() {
        let rows: Vec<(i64, &str)> = (1..=20).map(|k| (k, "v")).collect();
        let src = table(&rows).fail_fingerprint_at(11);
        let mut dst = table(&rows);
        dst.insert(12, vec![Some("12".into()), Some("other".into())]);

        let s = scheduler(src, dst, config(10, 2));
        let (report, divergences) = run(&s).await;

        assert_eq!(report.fingerprint_errors, 1);
        assert_eq!(report.chunks_mismatched, 1);
        assert_eq!(divergences.update, vec!["12"]);
        assert_eq!(report.status(), RunStatus::Degraded);
    }

    #[tokio::test]
    async fn test_reconcile_failure_drops_chunk() {
        let rows: Vec<(i64, &str)> = (1..=20).map(|k| (k, "v")).collect();
        let mut dst = table(&rows).fail_signatures_at(1);
        dst.insert(2, vec![Some("2".into()), Some("other".into())]);
        dst.insert(15, vec![Some("15".into()), Some("other".into())]);

        let s = scheduler(table(&rows), dst, config(10, 2));
        let (report, divergences) = run(&s).await;

        assert_eq!(report.reconcile_errors, 1);
        assert_eq!(report.chunks_mismatched, 2);
        assert_eq!(divergences.update, vec!["15"]);
        assert_eq!(report.status(), RunStatus::Degraded);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_fatal() {
        let src = table(&[(1, "a")]);
        let dst = MemoryTable::new(
            TableIdentity::new("shop", "orders").with_primary_key("id"),
            vec![Column::new("id", "bigint"), Column::new("w", "varchar")],
        );
        let s = scheduler(src, dst, config(10, 2));
        let err = s
            .run(Arc::new(DivergenceSets::new()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DiffError::SchemaMismatch(_)));
    }

    #[tokio::test]
    async fn test_column_filter_limits_schema_check() {
        let identity = TableIdentity::new("shop", "orders")
            .with_primary_key("id")
            .with_columns(vec!["id".into(), "v".into()]);
        let mut src = MemoryTable::new(
            identity.clone(),
            vec![
                Column::new("id", "bigint"),
                Column::new("v", "varchar"),
                Column::new("note", "text"),
            ],
        );
        src.insert(1, vec![Some("1".into()), Some("a".into()), Some("x".into())]);
        let mut dst = MemoryTable::new(identity, columns());
        dst.insert(1, vec![Some("1".into()), Some("a".into())]);

        let s = scheduler(src, dst, config(10, 2));
        let (report, divergences) = run(&s).await;
        assert_eq!(report.status(), RunStatus::InSync);
        assert!(divergences.is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_engine_uses_simple_checksums() {
        let rows = [(1, "a"), (2, "b")];
        let s = scheduler(
            table(&rows),
            table(&rows).with_aggregate_engine(true),
            config(10, 2),
        );
        let plan = s.plan().await.unwrap();
        assert_eq!(plan.algorithm, FingerprintAlgorithm::Simple);
        assert_eq!(plan.chunks, vec![KeyRange::new(1, 11)]);
    }

    #[tokio::test]
    async fn test_empty_tables_plan_no_workers() {
        let s = scheduler(table(&[]), table(&[]), config(10, 4));
        let (report, divergences) = run(&s).await;
        assert_eq!(report.chunks_planned, 0);
        assert_eq!(report.workers, 0);
        assert!(divergences.is_empty());
        assert_eq!(report.status(), RunStatus::InSync);
    }

    #[tokio::test]
    async fn test_progress_updates() {
        let rows: Vec<(i64, &str)> = (1..=30).map(|k| (k, "v")).collect();
        let (tx, mut rx) = mpsc::channel(64);
        let s = scheduler(table(&rows), table(&rows), config(10, 2)).with_progress(tx);
        let (report, _) = run(&s).await;
        drop(s);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        assert_eq!(updates.len(), report.chunks_scanned);
        let last = updates.last().unwrap();
        assert_eq!(last.chunks_scanned, 3);
        assert_eq!(last.chunks_total, 3);
    }
}

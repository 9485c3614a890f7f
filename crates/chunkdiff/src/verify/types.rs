//! Type definitions for chunked verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::config::KeyMode;
use super::fingerprint::FingerprintAlgorithm;

/// Map of primary key (as text) to row signature for one range of one table.
pub type RowFingerprint = HashMap<String, String>;

/// Row-level differences found in one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkDivergence {
    /// Keys in the source only (need INSERT).
    pub missing_in_dest: Vec<String>,
    /// Keys in the destination only (need DELETE).
    pub missing_in_source: Vec<String>,
    /// Keys in both whose signatures differ (need UPDATE).
    pub value_mismatch: Vec<String>,
}

impl ChunkDivergence {
    /// Total number of differences.
    pub fn total_differences(&self) -> usize {
        self.missing_in_dest.len() + self.missing_in_source.len() + self.value_mismatch.len()
    }

    /// Check if there are any differences.
    pub fn has_differences(&self) -> bool {
        self.total_differences() > 0
    }
}

/// Run-wide divergence accumulator shared by all reconciliation workers.
///
/// Three append-only lists, each behind its own lock. Chunks are disjoint,
/// so no key is appended twice and nothing is deduplicated here.
#[derive(Debug, Default)]
pub struct DivergenceSets {
    insert: Mutex<Vec<String>>,
    update: Mutex<Vec<String>>,
    delete: Mutex<Vec<String>>,
}

impl DivergenceSets {
    /// Create empty sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk's findings.
    pub fn record(&self, chunk: &ChunkDivergence) {
        if !chunk.missing_in_dest.is_empty() {
            lock(&self.insert).extend(chunk.missing_in_dest.iter().cloned());
        }
        if !chunk.value_mismatch.is_empty() {
            lock(&self.update).extend(chunk.value_mismatch.iter().cloned());
        }
        if !chunk.missing_in_source.is_empty() {
            lock(&self.delete).extend(chunk.missing_in_source.iter().cloned());
        }
    }

    /// Keys to insert into the destination.
    pub fn insert_keys(&self) -> Vec<String> {
        lock(&self.insert).clone()
    }

    /// Keys to update in the destination.
    pub fn update_keys(&self) -> Vec<String> {
        lock(&self.update).clone()
    }

    /// Keys to delete from the destination.
    pub fn delete_keys(&self) -> Vec<String> {
        lock(&self.delete).clone()
    }

    /// Copy the lists out for reporting and repair.
    pub fn snapshot(&self) -> DivergenceReport {
        DivergenceReport {
            insert: self.insert_keys(),
            update: self.update_keys(),
            delete: self.delete_keys(),
        }
    }
}

// A panicking worker cannot leave a half-appended Vec behind, so a poisoned
// lock still guards consistent data.
fn lock(list: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    list.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owned copy of the divergence lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceReport {
    /// Keys missing in the destination.
    pub insert: Vec<String>,
    /// Keys whose values differ.
    pub update: Vec<String>,
    /// Keys missing in the source.
    pub delete: Vec<String>,
}

impl DivergenceReport {
    /// Total keys across the three lists.
    pub fn total(&self) -> usize {
        self.insert.len() + self.update.len() + self.delete.len()
    }

    /// Whether all three lists are empty.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One line per action: `insert: 3,9`, `update: 2`, `delete: 4`.
impl fmt::Display for DivergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = [
            ("insert", &self.insert),
            ("update", &self.update),
            ("delete", &self.delete),
        ];
        for (i, (action, keys)) in lists.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            if keys.is_empty() {
                write!(f, "{}: -", action)?;
            } else {
                write!(f, "{}: {}", action, keys.join(","))?;
            }
        }
        Ok(())
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Resolving projection, bounds, and the chunk plan.
    Planning,
    /// Fingerprinting chunks and dispatching mismatches.
    Scanning,
    /// Waiting for in-flight reconciliations.
    Draining,
    /// Every planned chunk was scanned.
    Done,
    /// Scanning stopped early on request.
    Cancelled,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Planning => write!(f, "planning"),
            RunPhase::Scanning => write!(f, "scanning"),
            RunPhase::Draining => write!(f, "draining"),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Overall verdict of a completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every chunk verified, no divergence.
    InSync,
    /// Every chunk verified, divergences found.
    Diverged,
    /// Some chunk errored; results are best effort.
    Degraded,
    /// Cancelled before every chunk was scanned.
    Cancelled,
}

impl RunStatus {
    /// Whether the pass verified every chunk it planned.
    pub fn is_clean(&self) -> bool {
        matches!(self, RunStatus::InSync | RunStatus::Diverged)
    }

    /// Process exit code for this verdict.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::InSync => 0,
            RunStatus::Diverged => 8,
            RunStatus::Degraded => 9,
            RunStatus::Cancelled => 130,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::InSync => write!(f, "in sync"),
            RunStatus::Diverged => write!(f, "diverged"),
            RunStatus::Degraded => write!(f, "degraded"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    /// Unique run identifier.
    pub run_id: String,
    /// Source table (`database.table`).
    pub source_table: String,
    /// Destination table (`database.table`).
    pub destination_table: String,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
    /// When the pass finished.
    pub completed_at: DateTime<Utc>,
    /// Checksum formula used.
    pub algorithm: FingerprintAlgorithm,
    /// Chunking strategy used.
    pub key_mode: KeyMode,
    /// Rows in the source under the row filter.
    pub source_row_count: i64,
    /// Rows in the destination under the row filter.
    pub destination_row_count: i64,
    /// Chunks produced by the planner.
    pub chunks_planned: usize,
    /// Chunks fingerprinted before the pass ended.
    pub chunks_scanned: usize,
    /// Chunks sent to row-level reconciliation.
    pub chunks_mismatched: usize,
    /// Chunks whose fingerprint query failed (escalated).
    pub fingerprint_errors: usize,
    /// Chunks whose reconciliation failed (dropped).
    pub reconcile_errors: usize,
    /// Reconciliation workers started.
    pub workers: usize,
    /// Final scheduler state.
    pub final_phase: RunPhase,
    /// Rows to insert into the destination.
    pub rows_to_insert: usize,
    /// Rows to update in the destination.
    pub rows_to_update: usize,
    /// Rows to delete from the destination.
    pub rows_to_delete: usize,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl DiffReport {
    /// Verdict derived from the counters.
    pub fn status(&self) -> RunStatus {
        if self.final_phase == RunPhase::Cancelled {
            RunStatus::Cancelled
        } else if self.fingerprint_errors > 0 || self.reconcile_errors > 0 {
            RunStatus::Degraded
        } else if self.rows_to_insert + self.rows_to_update + self.rows_to_delete > 0 {
            RunStatus::Diverged
        } else {
            RunStatus::InSync
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Progress update emitted after each scanned chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffProgressUpdate {
    /// Table being verified (source side).
    pub table: String,
    /// Chunks in the plan.
    pub chunks_total: usize,
    /// Chunks fingerprinted so far.
    pub chunks_scanned: usize,
    /// Chunks dispatched to reconciliation so far.
    pub mismatches_found: usize,
}

//! Per-range fingerprints.
//!
//! A fingerprint is an order-independent aggregate of per-row hashes computed
//! inside the database, so comparing a chunk costs one scalar per side instead
//! of shipping its rows. Two formulas exist:
//!
//! - **Simple** (CRC32): `BIT_XOR` of `CRC32(CONCAT_WS('#', cols))`, rendered
//!   as 8 lowercase hex digits. Cheap; used when either side is TiDB.
//! - **Precise** (MD5): each row becomes a composite of type-normalized values
//!   plus a null-flag vector, hashed with MD5. The 128-bit digest is split in
//!   two 64-bit halves that are XOR-aggregated independently and rendered as
//!   32 hex digits.
//!
//! Both render a range with no rows as [`EMPTY_FINGERPRINT`].
//!
//! The SQL text lives in [`super::hash_query`]. This module holds the
//! algorithm selection and an in-process implementation of both formulas that
//! yields the same strings for the same values; the in-memory driver uses it.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::AlgorithmChoice;
use crate::core::schema::{Column, ColumnKind, KeyRange};
use crate::core::traits::TableSnapshot;
use crate::error::{DiffError, Result};

/// Fingerprint of a range with zero matching rows.
pub const EMPTY_FINGERPRINT: &str = "0";

/// Separator placed between column values in row composites and signatures.
pub const FIELD_DELIMITER: &str = "#";

/// Hex-encoded aggregate checksum of one key range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a checksum string returned by the engine.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The zero-row sentinel.
    pub fn empty() -> Self {
        Self(EMPTY_FINGERPRINT.to_string())
    }

    /// Whether this is the zero-row sentinel.
    pub fn is_empty_range(&self) -> bool {
        self.0 == EMPTY_FINGERPRINT
    }

    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checksum formula run inside the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintAlgorithm {
    /// CRC32 per row, single XOR aggregate.
    Simple,
    /// MD5 per row over a normalized, null-flagged composite, two XOR halves.
    Precise,
}

impl FingerprintAlgorithm {
    /// Pick the formula from the engine probe.
    pub fn select(aggregate_engine: bool) -> Self {
        if aggregate_engine {
            FingerprintAlgorithm::Simple
        } else {
            FingerprintAlgorithm::Precise
        }
    }

    /// Apply a configured choice, falling back to the probe for `auto`.
    pub fn resolve(choice: AlgorithmChoice, aggregate_engine: bool) -> Self {
        match choice {
            AlgorithmChoice::Auto => Self::select(aggregate_engine),
            AlgorithmChoice::Simple => FingerprintAlgorithm::Simple,
            AlgorithmChoice::Precise => FingerprintAlgorithm::Precise,
        }
    }
}

impl fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintAlgorithm::Simple => write!(f, "crc32"),
            FingerprintAlgorithm::Precise => write!(f, "md5"),
        }
    }
}

/// Outcome of comparing one chunk on both tables.
#[derive(Debug)]
pub enum ChunkCheck {
    /// Both sides produced the same fingerprint.
    Match(Fingerprint),
    /// Fingerprints differ.
    Mismatch {
        source: Fingerprint,
        destination: Fingerprint,
    },
    /// One side could not be fingerprinted.
    Failed(DiffError),
}

impl ChunkCheck {
    /// Whether the chunk has to go to row-level reconciliation.
    ///
    /// Failures escalate: an unverifiable chunk is compared row by row rather
    /// than skipped.
    pub fn needs_reconcile(&self) -> bool {
        !matches!(self, ChunkCheck::Match(_))
    }
}

/// Computes and compares fingerprints for a fixed projection and formula.
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    algorithm: FingerprintAlgorithm,
    projection: Vec<Column>,
}

impl FingerprintEngine {
    /// Create an engine for one pass.
    pub fn new(algorithm: FingerprintAlgorithm, projection: Vec<Column>) -> Self {
        Self {
            algorithm,
            projection,
        }
    }

    /// Fingerprint one range of one table.
    pub async fn compute(&self, table: &dyn TableSnapshot, range: &KeyRange) -> Result<Fingerprint> {
        table
            .range_fingerprint(&self.projection, range, self.algorithm)
            .await
    }

    /// Fingerprint `range` on the source, then on the destination.
    pub async fn compare(
        &self,
        source: &dyn TableSnapshot,
        destination: &dyn TableSnapshot,
        range: &KeyRange,
    ) -> ChunkCheck {
        let source_fp = match self.compute(source, range).await {
            Ok(fp) => fp,
            Err(e) => return ChunkCheck::Failed(e),
        };
        let dest_fp = match self.compute(destination, range).await {
            Ok(fp) => fp,
            Err(e) => return ChunkCheck::Failed(e),
        };

        if source_fp == dest_fp {
            ChunkCheck::Match(source_fp)
        } else {
            ChunkCheck::Mismatch {
                source: source_fp,
                destination: dest_fp,
            }
        }
    }
}

// =============================================================================
// In-process formulas
// =============================================================================

/// `CONCAT_WS` semantics: NULL arguments are skipped, not rendered.
pub fn concat_ws<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> String {
    values
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(FIELD_DELIMITER)
}

/// `CONCAT(ISNULL(c1), ISNULL(c2), ...)`.
pub fn null_flags(values: &[Option<String>]) -> String {
    values
        .iter()
        .map(|v| if v.is_none() { '1' } else { '0' })
        .collect()
}

/// MySQL `CRC32()` (IEEE polynomial).
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Per-row hash of the simple formula.
pub fn simple_row_hash(values: &[Option<String>]) -> u32 {
    let joined = concat_ws(values.iter().map(|v| v.as_deref()));
    crc32(joined.as_bytes())
}

/// Per-row composite of the precise formula, before hashing.
pub fn precise_row_composite(projection: &[Column], values: &[Option<String>]) -> String {
    let rendered: Vec<Option<String>> = projection
        .iter()
        .zip(values)
        .map(|(column, value)| {
            value.as_ref().map(|v| match column.kind {
                ColumnKind::LargeObject => crc32(v.as_bytes()).to_string(),
                ColumnKind::NarrowText | ColumnKind::Other => v.clone(),
            })
        })
        .collect();

    let flags = null_flags(values);
    concat_ws(
        rendered
            .iter()
            .map(|v| v.as_deref())
            .chain(std::iter::once(Some(flags.as_str()))),
    )
}

/// Per-row MD5 of the precise formula, split into its high and low halves.
pub fn precise_row_digest(projection: &[Column], values: &[Option<String>]) -> (u64, u64) {
    let composite = precise_row_composite(projection, values);
    let digest = Md5::digest(composite.as_bytes());

    let mut high = [0u8; 8];
    let mut low = [0u8; 8];
    high.copy_from_slice(&digest[..8]);
    low.copy_from_slice(&digest[8..]);
    (u64::from_be_bytes(high), u64::from_be_bytes(low))
}

/// Signature used for row-level reconciliation: raw values plus null flags.
pub fn row_signature(values: &[Option<String>]) -> String {
    let flags = null_flags(values);
    concat_ws(
        values
            .iter()
            .map(|v| v.as_deref())
            .chain(std::iter::once(Some(flags.as_str()))),
    )
}

/// XOR aggregate over the rows of one range.
#[derive(Debug, Clone)]
pub struct FingerprintAccumulator {
    algorithm: FingerprintAlgorithm,
    rows: u64,
    high: u64,
    low: u64,
}

impl FingerprintAccumulator {
    /// Start an empty aggregate.
    pub fn new(algorithm: FingerprintAlgorithm) -> Self {
        Self {
            algorithm,
            rows: 0,
            high: 0,
            low: 0,
        }
    }

    /// Fold one row in.
    pub fn add_row(&mut self, projection: &[Column], values: &[Option<String>]) {
        self.rows += 1;
        match self.algorithm {
            FingerprintAlgorithm::Simple => {
                self.low ^= u64::from(simple_row_hash(values));
            }
            FingerprintAlgorithm::Precise => {
                let (high, low) = precise_row_digest(projection, values);
                self.high ^= high;
                self.low ^= low;
            }
        }
    }

    /// Render the aggregate.
    pub fn finish(&self) -> Fingerprint {
        if self.rows == 0 {
            return Fingerprint::empty();
        }
        match self.algorithm {
            FingerprintAlgorithm::Simple => Fingerprint::new(format!("{:08x}", self.low)),
            FingerprintAlgorithm::Precise => {
                Fingerprint::new(format!("{:016x}{:016x}", self.high, self.low))
            }
        }
    }
}

//! # chunkdiff
//!
//! Chunked checksum comparison of two MySQL/TiDB tables.
//!
//! This library finds the rows that differ between a source and a destination
//! table without shipping every row over the network:
//!
//! - **Chunk planning** over the primary key, dense or sparse
//! - **In-database fingerprints** per chunk (CRC32 or MD5 based)
//! - **Row-level reconciliation** only for chunks whose fingerprints differ
//! - **Parallel reconciliation** with a bounded worker pool and cancellation
//! - **Repair scripts** built from `mysqldump` output
//!
//! ## Example
//!
//! ```rust,no_run
//! use chunkdiff::{Checker, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> chunkdiff::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let checker = Checker::new(config).await?;
//!     let result = checker.run(CancellationToken::new()).await?;
//!     println!("{}: {} keys differ", result.status, result.divergences.total());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod repair;
pub mod verify;

// Re-exports for convenient access
pub use config::{AlgorithmChoice, CheckConfig, Config, DatabaseConfig, KeyMode, RepairConfig};
pub use core::{Column, ColumnKind, KeyBounds, KeyRange, TableIdentity, TableSnapshot};
pub use drivers::{MemoryTable, MysqlTable};
pub use error::{DiffError, Result};
pub use orchestrator::{CheckResult, Checker, HealthCheckResult};
pub use repair::{RepairSummary, RepairWriter};
pub use verify::{
    DiffPlan, DiffReport, DiffScheduler, DivergenceReport, DivergenceSets, Fingerprint,
    FingerprintAlgorithm, RunPhase, RunStatus,
};

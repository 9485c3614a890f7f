//! Check orchestrator - main workflow coordinator.

use crate::config::{CheckConfig, Config, DatabaseConfig};
use crate::core::schema::TableIdentity;
use crate::core::traits::TableSnapshot;
use crate::drivers::MysqlTable;
use crate::error::Result;
use crate::repair::{RepairSummary, RepairWriter};
use crate::verify::{
    DiffPlan, DiffProgressUpdate, DiffReport, DiffScheduler, DivergenceReport, DivergenceSets,
    RunStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Check orchestrator.
pub struct Checker {
    config: Config,
    source: Arc<MysqlTable>,
    destination: Arc<MysqlTable>,
    pk_column: String,
    progress: bool,
}

/// Result of a check run.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Overall verdict.
    pub status: RunStatus,

    /// Scheduler counters and timings.
    pub report: DiffReport,

    /// Keys to insert, update, and delete in the destination.
    pub divergences: DivergenceReport,

    /// Repair script summary, when one was written.
    pub repair: Option<RepairSummary>,

    /// Why the repair script was not written, when it failed or was refused.
    pub repair_error: Option<String>,
}

impl CheckResult {
    /// Process exit code for this result.
    ///
    /// A failed repair step maps to the repair error code; otherwise the
    /// verdict decides.
    pub fn exit_code(&self) -> u8 {
        if self.repair_error.is_some() {
            5
        } else {
            self.status.exit_code()
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connectivity of both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_version: Option<String>,
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    pub destination_version: Option<String>,
    pub destination_error: Option<String>,
    pub healthy: bool,
}

/// Identity of one side as configured.
fn identity_for(db: &DatabaseConfig, check: &CheckConfig) -> TableIdentity {
    TableIdentity::new(&db.database, &db.table)
        .with_columns(check.columns.clone())
        .with_row_filter(check.row_filter.clone())
        .with_key_mode(check.key_mode)
}

impl Checker {
    /// Connect both tables and bind the source's primary key to both.
    pub async fn new(config: Config) -> Result<Self> {
        let threads = config.check.threads;

        let mut source = MysqlTable::connect(
            &config.source,
            identity_for(&config.source, &config.check),
            config.source.pool_size(threads),
        )
        .await?;
        let mut destination = MysqlTable::connect(
            &config.destination,
            identity_for(&config.destination, &config.check),
            config.destination.pool_size(threads),
        )
        .await?;

        let pk_column = source.discover_primary_key().await?;
        info!("Primary key of {}: {}", source.label(), pk_column);
        source.bind_primary_key(&pk_column);
        destination.bind_primary_key(&pk_column);

        Ok(Self {
            config,
            source: Arc::new(source),
            destination: Arc::new(destination),
            pk_column,
            progress: false,
        })
    }

    /// Print progress updates as JSON lines to stderr.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    fn scheduler(&self) -> DiffScheduler {
        DiffScheduler::new(
            Arc::clone(&self.source) as Arc<dyn TableSnapshot>,
            Arc::clone(&self.destination) as Arc<dyn TableSnapshot>,
            self.config.check.clone(),
        )
    }

    /// Plan the pass without scanning (dry run).
    pub async fn plan(&self) -> Result<DiffPlan> {
        self.scheduler().plan().await
    }

    /// Run a full pass and, when enabled, write the repair script.
    pub async fn run(&self, cancel: CancellationToken) -> Result<CheckResult> {
        let mut scheduler = self.scheduler();
        let progress_handle = if self.progress {
            let (tx, rx) = mpsc::channel::<DiffProgressUpdate>(64);
            scheduler = scheduler.with_progress(tx);
            Some(tokio::spawn(print_progress(rx)))
        } else {
            None
        };

        let sets = Arc::new(DivergenceSets::new());
        let report = scheduler.run(Arc::clone(&sets), cancel).await;
        // Dropping the scheduler closes the progress channel
        drop(scheduler);
        if let Some(handle) = progress_handle {
            let _ = handle.await;
        }
        let report = report?;

        let status = report.status();
        let divergences = sets.snapshot();

        let (repair, repair_error) = if divergences.is_empty() {
            (None, None)
        } else if !self.config.repair.enabled {
            (None, None)
        } else if status == RunStatus::Cancelled {
            warn!("Run was cancelled, skipping repair script");
            (None, None)
        } else {
            let writer = RepairWriter::new(
                self.config.repair.clone(),
                self.config.source.clone(),
                self.config.destination.clone(),
                self.pk_column.clone(),
            );
            match writer.write(&divergences).await {
                Ok(summary) => (Some(summary), None),
                Err(e) => {
                    error!("Repair script not written: {}", e);
                    (None, Some(e.to_string()))
                }
            }
        };

        if repair.is_none() && !divergences.is_empty() {
            warn!(
                "{} keys differ between {} and {}:\n{}",
                divergences.total(),
                self.source.label(),
                self.destination.label(),
                divergences
            );
        }

        Ok(CheckResult {
            status,
            report,
            divergences,
            repair,
            repair_error,
        })
    }

    /// Connect to both sides and report latency and engine version.
    ///
    /// Connection failures are reported in the result, not returned.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let (source_connected, source_latency_ms, source_version, source_error) =
            probe(&config.source, &config.check).await;
        let (destination_connected, destination_latency_ms, destination_version, destination_error) =
            probe(&config.destination, &config.check).await;

        HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_version,
            source_error,
            destination_connected,
            destination_latency_ms,
            destination_version,
            destination_error,
            healthy: source_connected && destination_connected,
        }
    }
}

async fn probe(
    db: &DatabaseConfig,
    check: &CheckConfig,
) -> (bool, u64, Option<String>, Option<String>) {
    let start = Instant::now();
    match MysqlTable::connect(db, identity_for(db, check), 1).await {
        Ok(table) => {
            let latency = start.elapsed().as_millis() as u64;
            let version = table.server_version().await.ok();
            table.close().await;
            (true, latency, version, None)
        }
        Err(e) => (
            false,
            start.elapsed().as_millis() as u64,
            None,
            Some(e.to_string()),
        ),
    }
}

async fn print_progress(mut rx: mpsc::Receiver<DiffProgressUpdate>) {
    while let Some(update) = rx.recv().await {
        if let Ok(line) = serde_json::to_string(&update) {
            eprintln!("{}", line);
        }
    }
}

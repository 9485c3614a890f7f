//! chunkdiff CLI - chunked checksum comparison of two MySQL/TiDB tables.

use chunkdiff::{Checker, Config, DiffError, KeyMode};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "chunkdiff")]
#[command(about = "Chunked checksum comparison of two MySQL/TiDB tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the source and destination tables
    Run {
        /// Override number of reconciliation workers
        #[arg(long)]
        threads: Option<usize>,

        /// Override chunk size (keys per chunk, or rows per chunk with --sparse)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Place chunk boundaries by row count instead of key width
        #[arg(long)]
        sparse: bool,

        /// Do not write a repair script even if enabled in the config
        #[arg(long)]
        no_repair: bool,

        /// Dry run: plan chunks without fingerprinting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, DiffError> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format).map_err(DiffError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            threads,
            chunk_size,
            sparse,
            no_repair,
            dry_run,
        } => {
            // Apply overrides
            if let Some(t) = threads {
                config.check.threads = t;
            }
            if let Some(size) = chunk_size {
                config.check.chunk_size = size;
            }
            if sparse {
                config.check.key_mode = KeyMode::Sparse;
            }
            if no_repair {
                config.repair.enabled = false;
            }
            config.validate()?;

            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler().await?;

            let checker = Checker::new(config).await?.with_progress(cli.progress);

            if dry_run {
                let plan = checker.plan().await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("\nDry run completed!");
                    println!("  Algorithm: {}", plan.algorithm);
                    println!("  Key mode: {}", plan.key_mode);
                    println!("  Columns: {}", plan.projection.len());
                    println!(
                        "  Rows: {} source, {} destination",
                        plan.source_row_count, plan.destination_row_count
                    );
                    println!("  Chunks: {}", plan.chunks.len());
                    if let (Some(first), Some(last)) = (plan.chunks.first(), plan.chunks.last()) {
                        println!("  Key span: [{}, {})", first.start, last.end);
                    }
                }
                return Ok(0);
            }

            let result = checker.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let report = &result.report;
                println!("\nCheck completed: {}", result.status);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_ms as f64 / 1000.0);
                println!(
                    "  Chunks: {}/{} scanned, {} mismatched ({} workers, {})",
                    report.chunks_scanned,
                    report.chunks_planned,
                    report.chunks_mismatched,
                    report.workers,
                    report.algorithm
                );
                println!("  Rows to insert: {}", report.rows_to_insert);
                println!("  Rows to update: {}", report.rows_to_update);
                println!("  Rows to delete: {}", report.rows_to_delete);
                if report.fingerprint_errors > 0 || report.reconcile_errors > 0 {
                    println!(
                        "  Errors: {} fingerprint, {} reconcile",
                        report.fingerprint_errors, report.reconcile_errors
                    );
                }
                if let Some(ref repair) = result.repair {
                    println!(
                        "  Repair script: {} ({} deletes, {} replaces)",
                        repair.path.display(),
                        repair.delete_statements,
                        repair.replace_statements
                    );
                }
                if let Some(ref err) = result.repair_error {
                    println!("  Repair script not written: {}", err);
                }
                if result.repair.is_none() && !result.divergences.is_empty() {
                    println!("  Keys:");
                    for line in result.divergences.to_string().lines() {
                        println!("    {}", line);
                    }
                }
            }

            Ok(result.exit_code())
        }

        Commands::HealthCheck => {
            let result = Checker::health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms)",
                    config.source.label(),
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref version) = result.source_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination ({}): {} ({}ms)",
                    config.destination.label(),
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref version) = result.destination_version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(DiffError::connection(
                    "health check failed",
                    "connecting to source and destination",
                ));
            }
            Ok(0)
        }
    }
}

/// Default filter directive for `--verbosity`. Unknown values fall back to info.
fn level_directive(verbosity: &str) -> &'static str {
    match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// `RUST_LOG` wins over `--verbosity` when set.
fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(verbosity)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, DiffError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    // SIGINT handler (Ctrl-C)
    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Finishing in-flight chunks...");
        token_int.cancel();
    });

    // SIGTERM handler
    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Finishing in-flight chunks...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, DiffError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight chunks...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("DEBUG"), "debug");
        assert_eq!(level_directive("warn"), "warn");
        assert_eq!(level_directive("error"), "error");
        assert_eq!(level_directive("info"), "info");
        assert_eq!(level_directive("loud"), "info");
    }
}

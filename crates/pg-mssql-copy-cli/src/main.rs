//! pg-mssql-copy CLI - bulk PostgreSQL to SQL Server table copies.

use clap::{Parser, Subcommand};
use pg_mssql_copy::{Config, CopyError, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-mssql-copy")]
#[command(about = "Bulk PostgreSQL to SQL Server table copy")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file. Falls back to PG_*/SQL_* environment
    /// variables when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every candidate table that does not exist at the destination
    Run {
        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of parallel workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List candidate source tables without copying
    ListTables,

    /// Compare source and destination row counts
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), CopyError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            let config = Config::from_env()?;
            info!("Loaded configuration from environment");
            config
        }
    };

    match cli.command {
        Commands::Run {
            source_schema,
            target_schema,
            workers,
        } => {
            if let Some(schema) = source_schema {
                config.source.schema = schema;
            }
            if let Some(schema) = target_schema {
                config.target.schema = schema;
            }
            if let Some(w) = workers {
                config.copy.workers = Some(w);
            }
            config.validate()?;

            let cancel = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(Some(cancel)).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nCopy run finished: {:?}", result.status);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Tables: {} copied, {} skipped, {} failed (of {})",
                    result.tables_copied,
                    result.tables_skipped,
                    result.tables_failed,
                    result.tables_total
                );
                println!("  Rows: {}", result.rows_copied);
                if !result.failed_tables.is_empty() {
                    println!("  Failed tables: {:?}", result.failed_tables);
                }
            }
        }

        Commands::ListTables => {
            let orchestrator = Orchestrator::new(config).await?;
            let tables = orchestrator.list_tables().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for table in &tables {
                    println!("{}", table);
                }
                println!("\n{} candidate tables", tables.len());
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let reports = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                let mut mismatches = 0;
                for report in &reports {
                    let status = match report.destination_rows {
                        Some(dest) if report.matches => format!("OK ({} rows)", dest),
                        Some(dest) => {
                            mismatches += 1;
                            format!("MISMATCH (source {}, destination {})", report.source_rows, dest)
                        }
                        None => {
                            mismatches += 1;
                            "MISSING at destination".to_string()
                        }
                    };
                    println!("  {}: {}", report.table, status);
                }
                if mismatches > 0 {
                    return Err(CopyError::Config(format!(
                        "{} of {} tables do not match",
                        mismatches,
                        reports.len()
                    )));
                }
                println!("All {} tables match", reports.len());
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            orchestrator.health_check().await?;
            println!("Source and target connections OK");
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Raise the cancellation flag on SIGINT or SIGTERM. In-flight batches
/// finish their stage-and-drain cycle before workers stop.
#[cfg(unix)]
fn setup_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to set up SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to set up SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Letting in-flight batches finish..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Letting in-flight batches finish..."),
        }

        let _ = tx.send(true);
    });

    rx
}

#[cfg(not(unix))]
fn setup_signal_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to set up Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Letting in-flight batches finish...");
        let _ = tx.send(true);
    });

    rx
}

//! signal-ingest CLI - CSV order/trade ingestion server and tools.

use clap::{Parser, Subcommand};
use serde_json::json;
use signal_ingest::api::{self, AppState};
use signal_ingest::ingest::prepare_document;
use signal_ingest::{
    CanonicalSchema, Config, IngestError, IngestLimits, Ingestor, NewUpload, PgStore, Store,
    UploadArchive,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "signal-ingest")]
#[command(about = "Atomic CSV order/trade ingestion into PostgreSQL")]
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

    /// Timeout in seconds for graceful shutdown
    #[arg(long, default_value = "30")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Override listen address
        #[arg(long)]
        bind: Option<String>,

        /// Override listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Ingest a local CSV file
    Ingest {
        /// CSV file to ingest
        file: PathBuf,

        /// Source address recorded on the upload
        #[arg(long, default_value = "local")]
        source: String,

        /// Dry run: read, map and coerce without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the database schema and tables if absent
    InitDb,

    /// Test the database connection
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

async fn run() -> Result<(), IngestError> {
    let cli = Cli::parse();

    // A .env file in the working directory feeds the environment overrides
    dotenv::dotenv().ok();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(IngestError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler(cli.shutdown_timeout)?;

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            let store: Arc<dyn Store> = Arc::new(PgStore::new(&config.database).await?);
            let state = AppState::new(
                store,
                UploadArchive::new(config.ingest.upload_dir.clone()),
                IngestLimits::from(&config.ingest),
                config.server.api_key.clone(),
            );

            let listener = tokio::net::TcpListener::bind(config.server.listen_addr()).await?;
            let shutdown = {
                let token = cancel_token.clone();
                async move { token.cancelled().await }
            };

            let server = api::serve(listener, state, shutdown);
            tokio::pin!(server);

            let drain_deadline = async {
                cancel_token.cancelled().await;
                tokio::time::sleep(Duration::from_secs(cli.shutdown_timeout)).await;
            };

            tokio::select! {
                result = &mut server => result?,
                _ = drain_deadline => {
                    warn!(
                        "In-flight requests still running after {}s, exiting",
                        cli.shutdown_timeout
                    );
                    return Err(IngestError::Cancelled);
                }
            }
        }

        Commands::Ingest {
            file,
            source,
            dry_run,
        } => {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let limits = IngestLimits::from(&config.ingest);

            if dry_run {
                let batch = prepare_document(CanonicalSchema::market_signal(), &bytes, &limits)?;

                if cli.output_json {
                    let report = json!({
                        "file": filename,
                        "columns": batch.header.columns(),
                        "rows": batch.rows.len(),
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    println!("Dry run completed!");
                    println!("  File: {}", filename);
                    println!("  Columns: {}", batch.header.columns().join(", "));
                    println!("  Rows: {}", batch.rows.len());
                }
                return Ok(());
            }

            let store = Arc::new(PgStore::new(&config.database).await?);
            let ingestor = Ingestor::new(store, limits);
            let upload = NewUpload {
                filename,
                path: Some(file.display().to_string()),
                source_addr: source,
            };

            let started = Instant::now();
            let receipt = tokio::select! {
                result = ingestor.ingest(&upload, &bytes) => result?,
                _ = cancel_token.cancelled() => return Err(IngestError::Cancelled),
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            } else {
                println!("\nIngestion completed!");
                println!("  Upload ID: {}", receipt.upload_id);
                println!("  Rows: {}", receipt.rows);
                println!("  Duration: {:.2}s", started.elapsed().as_secs_f64());
            }
        }

        Commands::InitDb => {
            let store = PgStore::new(&config.database).await?;
            let schema = CanonicalSchema::market_signal();
            store.init_schema(schema).await?;
            println!(
                "Schema '{}' ready (tables: source_file, {}, signal)",
                config.database.schema,
                schema.table()
            );
        }

        Commands::HealthCheck => {
            let started = Instant::now();
            let result = match PgStore::new(&config.database).await {
                Ok(store) => store.ping().await,
                Err(e) => Err(e),
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            if cli.output_json {
                let report = json!({
                    "connected": result.is_ok(),
                    "latency_ms": latency_ms,
                    "error": result.as_ref().err().map(|e| e.to_string()),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  PostgreSQL: {} ({}ms)",
                    if result.is_ok() { "OK" } else { "FAILED" },
                    latency_ms
                );
                if let Err(ref err) = result {
                    println!("    Error: {}", err);
                }
            }

            result?;
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = if format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    result.map_err(|e| format!("failed to initialize logging: {}", e))
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, IngestError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, IngestError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}

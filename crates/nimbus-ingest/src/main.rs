//! Nimbus ingestion daemon.
//!
//! This is the main entry point for the polling ingestion service. It
//! reads the source list and tuning from the environment, spawns one
//! worker per source, and keeps polling until shutdown.
//!
//! # Usage
//!
//! ```bash
//! # Run with settings from the environment / .env
//! NIMBUS_DATABASE_URL=postgres://localhost/nimbus \
//! NIMBUS_SOURCES="dwd=https://feed.example/records" \
//!     nimbus-ingest
//!
//! # Apply pending migrations first, then start polling
//! nimbus-ingest --migrate
//!
//! # Run one cycle per source and exit (cron-style operation)
//! nimbus-ingest --once
//! ```
//!
//! # Graceful Shutdown
//!
//! The daemon handles SIGINT (Ctrl+C) for graceful shutdown:
//! 1. Signals every worker through a watch channel
//! 2. In-flight cycles abort; their transactions roll back
//! 3. The next start resumes from the committed watermarks

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use nimbus_core::metrics::{init_metrics, start_metrics_server};
use nimbus_ingest::{Config, Worker};
use nimbus_store::{PgConfig, PgStore, Store};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Nimbus ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "nimbus-ingest")]
#[command(about = "Polling ingestion daemon for observation feeds")]
#[command(version)]
struct Args {
    /// Apply pending schema migrations before starting
    #[arg(long)]
    migrate: bool,

    /// Run a single cycle per source, then exit
    #[arg(long)]
    once: bool,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("nimbus_ingest=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("invalid worker configuration")?;

    tracing::info!("Nimbus ingestion daemon starting...");

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    // Connect and fail fast if the database is unusable
    let pg = PgConfig::new(&config.database_url)
        .with_pool_size(config.db_pool_size)
        .with_timeout(config.db_timeout);
    let store = PgStore::connect(&pg).context("failed to build connection pool")?;
    store.ping().await.context("database is not reachable")?;

    if args.migrate {
        nimbus_store::migrate::migrate(store.pool())
            .await
            .context("migration failed")?;
    }
    store
        .check_schema()
        .await
        .context("schema out of date (run nimbus-migrate or pass --migrate)")?;

    tracing::info!("Configuration:");
    tracing::info!("  Sources: {}", config.sources.len());
    for spec in &config.sources {
        tracing::info!("    {} = {} ({:?})", spec.name, spec.url, spec.units);
    }
    tracing::info!("  Poll interval: {:?}", config.poll_interval);
    tracing::info!("  Fetch timeout: {:?}", config.fetch_timeout);
    tracing::info!(
        "  Retry: {} attempts, base {:?}, cap {:?}",
        config.retry.max_attempts,
        config.retry.base,
        config.retry.cap
    );

    let client = reqwest::Client::builder()
        .timeout(config.fetch_timeout)
        .user_agent(concat!("nimbus-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let store: Arc<dyn Store> = Arc::new(store);
    let workers: Vec<Worker> = config
        .sources
        .iter()
        .map(|spec| {
            Worker::new(
                spec.build(&client),
                store.clone(),
                spec.units,
                config.window,
                config.retry.clone(),
            )
        })
        .collect();

    gauge!("ingest_sources").set(workers.len() as f64);

    if args.once {
        return run_once(workers).await;
    }

    // Set up graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    gauge!("ingest_running").set(1.0);
    tracing::info!("Starting ingestion...");

    let mut handles = Vec::with_capacity(workers.len());
    for worker in workers {
        let name = worker.name().to_owned();
        let handle = tokio::spawn(worker.run(config.poll_interval, shutdown_rx.clone()));
        handles.push((name, handle));
    }
    drop(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping workers...");
    let _ = shutdown_tx.send(true);

    for (name, handle) in handles {
        if let Err(e) = handle.await {
            tracing::warn!(source = name, "worker task panicked: {e}");
        }
    }

    gauge!("ingest_running").set(0.0);
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Run one cycle for every source, report, and exit nonzero if any failed.
async fn run_once(workers: Vec<Worker>) -> Result<()> {
    let mut failed = 0usize;
    for worker in &workers {
        let name = worker.name().to_owned();
        match worker.run_cycle().await {
            Ok(stats) => {
                tracing::info!(
                    source = name,
                    fetched = stats.fetched,
                    valid = stats.valid,
                    inserted = stats.inserted,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    watermark = stats.watermark.map(|t| t.to_rfc3339()),
                    "cycle finished"
                );
            }
            Err(e) => {
                failed += 1;
                tracing::error!(source = name, "cycle failed: {e}");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} sources failed", workers.len());
    }
    Ok(())
}

//! Nimbus Serve - HTTP API server for observation queries.
//!
//! This binary starts the query API against the PostgreSQL record store.
//! The store must be migrated first (see `nimbus-migrate`); serving
//! against a missing or outdated schema is a startup error, not a
//! runtime surprise.

use std::sync::Arc;

use anyhow::Context;
use axum::http::Request;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use nimbus_core::metrics::{init_metrics, start_metrics_server};
use nimbus_serve::{router, AppState, Config};
use nimbus_store::{PgConfig, PgStore};

/// Nimbus API server for observation queries.
#[derive(Parser, Debug)]
#[command(name = "nimbus-serve")]
#[command(about = "HTTP query API over the Nimbus record store", long_about = None)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    /// Port for the Prometheus scrape endpoint (0 disables).
    #[arg(long, env = "NIMBUS_METRICS_PORT", default_value_t = 9091)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    // Load configuration
    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();

    // Connect to the store and fail fast on anything unusable
    let pg = PgConfig::new(&config.database_url)
        .with_pool_size(config.db_pool_size)
        .with_timeout(config.db_timeout);
    let store = PgStore::connect(&pg).context("failed to create connection pool")?;
    store
        .ping()
        .await
        .context("store unreachable at startup")?;
    store
        .check_schema()
        .await
        .context("schema out of date (run nimbus-migrate)")?;

    // Create application state
    let state = AppState::new(Arc::new(store), config);

    // Build router with middleware
    let app = router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "starting server");

    axum::serve(listener, app).await?;

    Ok(())
}

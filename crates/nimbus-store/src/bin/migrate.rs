//! Database migration runner.
//!
//! Applies any pending schema migrations to the configured Postgres
//! database, recording each in `schema_migrations`. Safe to run
//! repeatedly; already-applied migrations are skipped.
//!
//! # Usage
//!
//! ```bash
//! # Apply pending migrations
//! NIMBUS_DATABASE_URL=postgres://localhost/nimbus nimbus-migrate
//!
//! # Show the current schema version without applying anything
//! nimbus-migrate --status
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use nimbus_store::migrate::{migrate, schema_version, LATEST_VERSION};
use nimbus_store::{PgConfig, PgStore};

/// Database migration runner.
#[derive(Parser, Debug)]
#[command(name = "nimbus-migrate")]
#[command(about = "Apply pending schema migrations to the records database")]
#[command(version)]
struct Args {
    /// Postgres connection URL (falls back to NIMBUS_DATABASE_URL)
    #[arg(long, env = "NIMBUS_DATABASE_URL")]
    database_url: String,

    /// Report the current schema version without applying migrations
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = PgConfig::new(&args.database_url);
    let store = PgStore::connect(&config).context("failed to build connection pool")?;
    store
        .ping()
        .await
        .context("database is not reachable")?;

    let version = schema_version(store.pool()).await?;
    if args.status {
        println!("schema version: {version} (latest: {LATEST_VERSION})");
        return Ok(());
    }

    if version >= LATEST_VERSION {
        tracing::info!(version, "schema already up to date");
        return Ok(());
    }

    migrate(store.pool())
        .await
        .context("migration failed")?;
    let version = schema_version(store.pool()).await?;
    tracing::info!(version, "migrations applied");
    Ok(())
}

//! Embedded schema migrations.
//!
//! Migrations are numbered SQL files compiled into the binary and applied
//! in order, each inside its own transaction, with the applied set
//! recorded in `schema_migrations`. Re-running is a no-op, so the
//! standalone `nimbus-migrate` runner and the worker's `--migrate` flag
//! can be used interchangeably.

use crate::StoreError;
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;

const MIGRATIONS: &[(i32, &str, &str)] = &[(1, "init", include_str!("../migrations/0001_init.sql"))];

/// Schema version the binaries are built against.
pub const LATEST_VERSION: i32 = 1;

/// Highest applied migration version, or 0 on a virgin database.
pub async fn schema_version(pool: &Pool) -> Result<i32, StoreError> {
    let conn = pool.get().await?;
    match conn
        .query_one("SELECT coalesce(max(version), 0) FROM schema_migrations", &[])
        .await
    {
        Ok(row) => Ok(row.get(0)),
        Err(e) if e.code() == Some(&SqlState::UNDEFINED_TABLE) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Apply all pending migrations.
pub async fn migrate(pool: &Pool) -> Result<(), StoreError> {
    let mut conn = pool.get().await?;
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
             version    INT PRIMARY KEY, \
             name       TEXT NOT NULL, \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
    )
    .await?;

    for (version, name, sql) in MIGRATIONS {
        let applied = conn
            .query_opt(
                "SELECT version FROM schema_migrations WHERE version = $1",
                &[version],
            )
            .await?;
        if applied.is_some() {
            continue;
        }
        let tx = conn.transaction().await?;
        tx.batch_execute(sql).await?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES ($1, $2)",
            &[version, name],
        )
        .await?;
        tx.commit().await?;
        tracing::info!(version, name, "applied migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_dense() {
        for (i, (version, _, _)) in MIGRATIONS.iter().enumerate() {
            assert_eq!(*version, i as i32 + 1);
        }
        assert_eq!(MIGRATIONS.last().map(|m| m.0), Some(LATEST_VERSION));
    }

    #[test]
    fn test_migration_sql_nonempty() {
        for (_, name, sql) in MIGRATIONS {
            assert!(!sql.trim().is_empty(), "migration {name} is empty");
        }
    }
}

//! PostgreSQL-backed [`Store`].

use crate::query::apply_projection;
use crate::{collapse_batch, RecordQuery, SourceStatus, Store, StoreError, UpsertReport, Watermark};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    CreatePoolError, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use nimbus_core::{FieldValue, Record, SourceId};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_postgres::NoTls;

/// Connection settings for the PostgreSQL backend.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// `postgres://` connection string.
    pub url: String,
    /// Maximum pooled connections, shared by every worker and query task
    /// in the process.
    pub pool_size: usize,
    /// Bound on waiting for a pooled connection and on creating one.
    pub timeout: Duration,
}

impl PgConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 16,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the bounded connection pool.
    pub fn create_pool(&self) -> Result<Pool, CreatePoolError> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(self.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool = PoolConfig::new(self.pool_size);
        pool.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool);
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
    }
}

/// PostgreSQL store.
///
/// Each upsert batch runs in one explicit transaction; the per-record
/// compare-then-write keeps the inserted/updated/unchanged counts exact
/// and makes replays cheap no-ops. Reads go through single statements,
/// which see either the pre- or post-commit state of any batch, never a
/// slice of one.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a store from settings. Fails fast on an unparseable URL;
    /// connectivity is checked by [`PgStore::ping`].
    pub fn connect(config: &PgConfig) -> Result<Self, CreatePoolError> {
        Ok(Self::new(config.create_pool()?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Round-trip one trivial statement. Called at startup so an
    /// unreachable database fails the process instead of the first cycle.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Verify the schema matches what these binaries expect.
    pub async fn check_schema(&self) -> Result<(), StoreError> {
        let found = crate::migrate::schema_version(&self.pool).await?;
        if found < crate::migrate::LATEST_VERSION {
            return Err(StoreError::SchemaVersion {
                expected: crate::migrate::LATEST_VERSION,
                found,
            });
        }
        Ok(())
    }

    async fn upsert_tx(&self, batch: &[Record]) -> Result<UpsertReport, StoreError> {
        let mut report = UpsertReport::default();
        if batch.is_empty() {
            return Ok(report);
        }

        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        for record in collapse_batch(batch) {
            let source = record.source_id.as_str();
            let incoming = serde_json::to_value(&record.fields)?;
            let existing = tx
                .query_opt(
                    "SELECT fields FROM records \
                     WHERE source_id = $1 AND observed_at = $2 FOR UPDATE",
                    &[&source, &record.observed_at],
                )
                .await?;
            match existing {
                None => {
                    tx.execute(
                        "INSERT INTO records (source_id, observed_at, received_at, fields) \
                         VALUES ($1, $2, $3, $4)",
                        &[&source, &record.observed_at, &record.received_at, &incoming],
                    )
                    .await?;
                    report.inserted += 1;
                    report.note_written(record.observed_at);
                }
                Some(row) => {
                    let stored: BTreeMap<String, FieldValue> =
                        serde_json::from_value(row.get(0))?;
                    if stored == record.fields {
                        report.unchanged += 1;
                    } else {
                        tx.execute(
                            "UPDATE records SET received_at = $3, fields = $4 \
                             WHERE source_id = $1 AND observed_at = $2",
                            &[&source, &record.observed_at, &record.received_at, &incoming],
                        )
                        .await?;
                        report.updated += 1;
                        report.note_written(record.observed_at);
                    }
                }
            }
        }
        tx.commit().await?;
        Ok(report)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert(&self, batch: &[Record]) -> Result<UpsertReport, StoreError> {
        let started = Instant::now();
        let report = self
            .upsert_tx(batch)
            .await
            .inspect_err(|_| metrics::counter!("store_errors_total").increment(1))?;
        metrics::histogram!("store_upsert_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        if query.is_empty_range() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let conn = self.pool.get().await?;
        let source = query.source_id.as_str();
        let limit = query.effective_limit() as i64;
        let rows = conn
            .query(
                "SELECT source_id, observed_at, received_at, fields FROM records \
                 WHERE source_id = $1 AND observed_at >= $2 AND observed_at < $3 \
                   AND ($4::timestamptz IS NULL OR observed_at > $4) \
                 ORDER BY observed_at LIMIT $5",
                &[&source, &query.from, &query.to, &query.cursor, &limit],
            )
            .await
            .inspect_err(|_| metrics::counter!("store_errors_total").increment(1))?;

        let mut records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        apply_projection(&mut records, &query.normalized_fields());
        metrics::histogram!("store_query_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(records)
    }

    async fn get_watermark(&self, source: &SourceId) -> Result<Option<Watermark>, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT position, updated_at FROM watermarks WHERE source_id = $1",
                &[&source.as_str()],
            )
            .await?;
        Ok(row.map(|row| Watermark {
            position: row.get(0),
            updated_at: row.get(1),
        }))
    }

    async fn set_watermark(
        &self,
        source: &SourceId,
        position: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO watermarks (source_id, position, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (source_id) DO UPDATE \
               SET position = EXCLUDED.position, updated_at = EXCLUDED.updated_at \
               WHERE watermarks.position < EXCLUDED.position",
            &[&source.as_str(), &position, &Utc::now()],
        )
        .await?;
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<SourceStatus>, StoreError> {
        // Full outer join: a source shows up once its first batch commits,
        // even if the worker died before advancing the watermark.
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT source_id, w.position, w.updated_at, s.records \
                 FROM (SELECT source_id, count(*) AS records \
                       FROM records GROUP BY source_id) s \
                 FULL OUTER JOIN watermarks w USING (source_id) \
                 ORDER BY source_id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let position: Option<DateTime<Utc>> = row.get(1);
                let updated_at: Option<DateTime<Utc>> = row.get(2);
                SourceStatus {
                    source_id: SourceId::new(row.get::<_, String>(0)),
                    watermark: position.zip(updated_at).map(|(position, updated_at)| {
                        Watermark {
                            position,
                            updated_at,
                        }
                    }),
                    records: row.get::<_, Option<i64>>(3).unwrap_or(0) as u64,
                }
            })
            .collect())
    }
}

fn row_to_record(row: &tokio_postgres::Row) -> Result<Record, StoreError> {
    Ok(Record {
        source_id: SourceId::new(row.get::<_, String>(0)),
        observed_at: row.get(1),
        received_at: row.get(2),
        fields: serde_json::from_value(row.get(3))?,
    })
}

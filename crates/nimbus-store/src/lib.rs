//! Durable storage for observation records, plus the query-result cache.
//!
//! The [`Store`] trait is the single persistence seam of the system. The
//! ingestion worker writes through it (transactional upsert batches,
//! watermark advances) and the query service reads through it (keyset
//! range pages). Two implementations:
//!
//! - [`PgStore`]: PostgreSQL behind a bounded deadpool pool; the
//!   production backend
//! - [`MemStore`]: in-process BTreeMap twin with identical semantics,
//!   used by tests and local experiments
//!
//! [`cache::QueryCache`] lives here too so that writers (invalidation) and
//! readers (lookup) share one type.

pub mod cache;
mod error;
mod mem;
pub mod migrate;
mod pg;
mod query;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nimbus_core::{Record, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use error::StoreError;
pub use mem::MemStore;
pub use pg::{PgConfig, PgStore};
pub use query::RecordQuery;

/// Per-source ingestion cursor.
///
/// `position` is the greatest `observed_at` durably committed for the
/// source. The store keeps it monotone: writes with an older position are
/// ignored, so a replayed cycle can never move ingestion backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub position: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one transactional upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows that did not exist before.
    pub inserted: usize,
    /// Rows whose fields changed.
    pub updated: usize,
    /// Rows re-ingested with identical fields.
    pub unchanged: usize,
    /// `observed_at` span over rows actually written (inserted or
    /// updated); `None` when nothing changed. Drives cache invalidation.
    pub written_span: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl UpsertReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    fn note_written(&mut self, at: DateTime<Utc>) {
        self.written_span = Some(match self.written_span {
            None => (at, at),
            Some((min, max)) => (min.min(at), max.max(at)),
        });
    }
}

/// A source known to the store, with its ingestion progress.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: SourceId,
    pub watermark: Option<Watermark>,
    pub records: u64,
}

/// Durable persistence for observation records and ingestion watermarks.
///
/// Contract, shared by every implementation:
/// - `upsert` is atomic per batch: every row change commits or none do,
///   and a concurrent `query` never observes a half-applied batch
/// - `upsert` is idempotent: re-applying a committed batch reports zero
///   inserted and zero updated
/// - `query` pages are keyed by `observed_at`, never by offset, so pages
///   stay correct while writers run
/// - `set_watermark` is monotone
#[async_trait]
pub trait Store: Send + Sync {
    /// Apply a batch transactionally. Per natural key: absent → insert,
    /// identical fields → no-op, differing fields → update (refreshing
    /// `received_at`). Duplicate keys within the batch collapse to the
    /// last occurrence before the transaction starts.
    async fn upsert(&self, batch: &[Record]) -> Result<UpsertReport, StoreError>;

    /// One page of records ordered by `observed_at` ascending, honoring
    /// range, cursor, projection, and limit.
    async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError>;

    /// Current watermark, if any cycle ever committed for the source.
    async fn get_watermark(&self, source: &SourceId) -> Result<Option<Watermark>, StoreError>;

    /// Advance a source's watermark; positions only move forward.
    async fn set_watermark(
        &self,
        source: &SourceId,
        position: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Every source that has records or a watermark, with its record
    /// count. A source appears as soon as its first batch commits.
    async fn list_sources(&self) -> Result<Vec<SourceStatus>, StoreError>;
}

/// Collapse duplicate natural keys inside one batch; the last occurrence
/// wins. Returns records in key order for deterministic apply order.
pub(crate) fn collapse_batch(batch: &[Record]) -> Vec<&Record> {
    let mut by_key: BTreeMap<(&SourceId, DateTime<Utc>), &Record> = BTreeMap::new();
    for record in batch {
        by_key.insert((&record.source_id, record.observed_at), record);
    }
    by_key.into_values().collect()
}

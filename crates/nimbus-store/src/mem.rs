//! In-memory [`Store`] with the same semantics as the Postgres backend.
//!
//! The single `RwLock` write section makes every batch trivially atomic
//! and keeps readers off half-applied state, mirroring what the Postgres
//! implementation gets from transactions.

use crate::query::apply_projection;
use crate::{collapse_batch, RecordQuery, SourceStatus, Store, StoreError, UpsertReport, Watermark};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nimbus_core::{Record, SourceId};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    records: BTreeMap<(SourceId, DateTime<Utc>), Record>,
    watermarks: BTreeMap<SourceId, Watermark>,
}

/// In-process store over ordered maps.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, across all sources.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert(&self, batch: &[Record]) -> Result<UpsertReport, StoreError> {
        let mut report = UpsertReport::default();
        if batch.is_empty() {
            return Ok(report);
        }

        let mut inner = self.inner.write().await;
        for record in collapse_batch(batch) {
            let key = (record.source_id.clone(), record.observed_at);
            match inner.records.get(&key) {
                None => {
                    inner.records.insert(key, record.clone());
                    report.inserted += 1;
                    report.note_written(record.observed_at);
                }
                Some(existing) if existing.same_fields(record) => {
                    report.unchanged += 1;
                }
                Some(_) => {
                    inner.records.insert(key, record.clone());
                    report.updated += 1;
                    report.note_written(record.observed_at);
                }
            }
        }
        Ok(report)
    }

    async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        if query.is_empty_range() {
            return Ok(Vec::new());
        }
        let start = match query.cursor {
            Some(cursor) if cursor >= query.to => return Ok(Vec::new()),
            Some(cursor) if cursor >= query.from => {
                Bound::Excluded((query.source_id.clone(), cursor))
            }
            _ => Bound::Included((query.source_id.clone(), query.from)),
        };
        let end = Bound::Excluded((query.source_id.clone(), query.to));

        let inner = self.inner.read().await;
        let mut records: Vec<Record> = inner
            .records
            .range((start, end))
            .take(query.effective_limit())
            .map(|(_, record)| record.clone())
            .collect();
        drop(inner);

        apply_projection(&mut records, &query.normalized_fields());
        Ok(records)
    }

    async fn get_watermark(&self, source: &SourceId) -> Result<Option<Watermark>, StoreError> {
        Ok(self.inner.read().await.watermarks.get(source).copied())
    }

    async fn set_watermark(
        &self,
        source: &SourceId,
        position: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.watermarks.get_mut(source) {
            Some(existing) => {
                if position > existing.position {
                    existing.position = position;
                    existing.updated_at = Utc::now();
                }
            }
            None => {
                inner.watermarks.insert(
                    source.clone(),
                    Watermark {
                        position,
                        updated_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<SourceStatus>, StoreError> {
        let inner = self.inner.read().await;
        // Union of both maps: a source shows up once its first batch
        // commits, even if no watermark was ever advanced for it.
        let mut sources: BTreeSet<SourceId> = inner.watermarks.keys().cloned().collect();
        sources.extend(inner.records.keys().map(|(source_id, _)| source_id.clone()));
        let statuses = sources
            .into_iter()
            .map(|source_id| {
                let lo = (source_id.clone(), DateTime::<Utc>::MIN_UTC);
                let hi = (source_id.clone(), DateTime::<Utc>::MAX_UTC);
                let records = inner.records.range(lo..=hi).count() as u64;
                let watermark = inner.watermarks.get(&source_id).copied();
                SourceStatus {
                    source_id,
                    watermark,
                    records,
                }
            })
            .collect();
        Ok(statuses)
    }
}

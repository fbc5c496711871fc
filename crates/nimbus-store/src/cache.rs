//! Query-result caching with eager range invalidation.
//!
//! [`QueryCache`] pairs a moka TTL cache (the staleness safety net) with a
//! per-source interval index (the correctness mechanism). Every `put`
//! registers the query's time range under its source; every committed
//! write calls [`QueryCache::invalidate`] with the written span, which
//! walks only that source's intervals and evicts the intersecting entries.
//! Unrelated sources and disjoint ranges are never scanned.
//!
//! The cache is an optimization only: every caller treats a miss and a
//! disabled cache identically, so results are correct with caching off.

use crate::RecordQuery;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use nimbus_core::SourceId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default cache capacity (number of entries).
pub const DEFAULT_CACHE_CAPACITY: u64 = 1024;

/// Default TTL for cached entries. This is the documented freshness bound
/// for readers whose writers live in another process.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Index entries per source before a sweep drops the ones whose cache
/// entry already expired.
const INDEX_SWEEP_THRESHOLD: usize = 4096;

/// Cached response with metadata.
#[derive(Clone, Debug)]
pub struct CachedPage {
    /// Serialized JSON response.
    pub json: String,
    /// When this entry was cached.
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct IndexedRange {
    to: DateTime<Utc>,
    signature: String,
}

/// Response cache keyed by normalized query signatures.
pub struct QueryCache {
    entries: Cache<String, CachedPage>,
    /// Per-source interval index: `(from, seq) -> (to, signature)`. The
    /// `seq` disambiguates entries sharing a `from`; the BTreeMap order
    /// lets invalidation range-scan `from <= written_max`.
    index: DashMap<SourceId, BTreeMap<(DateTime<Utc>, u64), IndexedRange>>,
    seq: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            index: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_TTL)
    }

    /// Look up a cached page by its query signature.
    pub async fn get(&self, signature: &str) -> Option<CachedPage> {
        self.entries.get(signature).await
    }

    /// Cache a serialized page and register its range for invalidation.
    pub async fn put(&self, query: &RecordQuery, json: String) {
        let signature = query.signature();
        self.entries
            .insert(
                signature.clone(),
                CachedPage {
                    json,
                    cached_at: Utc::now(),
                },
            )
            .await;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut map = self.index.entry(query.source_id.clone()).or_default();
        map.insert(
            (query.from, seq),
            IndexedRange {
                to: query.to,
                signature,
            },
        );
        if map.len() > INDEX_SWEEP_THRESHOLD {
            let entries = &self.entries;
            map.retain(|_, range| entries.contains_key(&range.signature));
        }
    }

    /// Evict every entry whose range intersects the written span.
    ///
    /// `written_min..=written_max` are actual record timestamps, so an
    /// entry `[from, to)` intersects iff `from <= written_max` and
    /// `to > written_min`. Returns the number of evicted entries.
    pub async fn invalidate(
        &self,
        source: &SourceId,
        written_min: DateTime<Utc>,
        written_max: DateTime<Utc>,
    ) -> usize {
        let victims: Vec<((DateTime<Utc>, u64), String)> = {
            let Some(mut map) = self.index.get_mut(source) else {
                return 0;
            };
            let keys: Vec<_> = map
                .range(..=(written_max, u64::MAX))
                .filter(|(_, range)| range.to > written_min)
                .map(|(key, range)| (*key, range.signature.clone()))
                .collect();
            for (key, _) in &keys {
                map.remove(key);
            }
            keys
        };

        // moka eviction happens after the index guard is released; holding
        // a dashmap guard across an await point can deadlock.
        let mut evicted = 0;
        for (_, signature) in victims {
            self.entries.invalidate(&signature).await;
            evicted += 1;
        }
        if evicted > 0 {
            metrics::counter!("cache_invalidated_total").increment(evicted as u64);
            tracing::debug!(source = %source, evicted, "invalidated cached query results");
        }
        evicted
    }

    /// Number of live entries, after flushing pending maintenance.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

//! The per-source ingestion worker.
//!
//! A worker owns one source adapter and drives it through the fixed cycle
//! `Fetching -> Parsing -> Validating -> Upserting -> Advancing`, then goes
//! idle until the next poll. Any failure ends the cycle early: the
//! transaction under it rolls back, the watermark stays put, and the next
//! cycle re-fetches from the old position. Replayed records land as
//! unchanged upserts, so a cycle can die at any point without corrupting
//! the store.
//!
//! Workers never share state with each other; a broken source only ever
//! stalls its own records.

use crate::error::{Error, Result};
use crate::parse::{parse_batch, validate_batch, Units};
use crate::retry::{IsRetryable, RetryConfig, with_retry};
use crate::source::RecordSource;
use chrono::{DateTime, Utc};
use nimbus_core::metrics::{count_cycle, count_fetch_error, record_watermark};
use nimbus_core::{SourceId, ValidationWindow};
use nimbus_store::cache::QueryCache;
use nimbus_store::Store;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Phase of an ingestion cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Fetching,
    Parsing,
    Validating,
    Upserting,
    Advancing,
    Error,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Parsing => "parsing",
            CyclePhase::Validating => "validating",
            CyclePhase::Upserting => "upserting",
            CyclePhase::Advancing => "advancing",
            CyclePhase::Error => "error",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters from one completed cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    /// Raw items the source returned.
    pub fetched: usize,
    /// Items dropped while parsing.
    pub skipped_parse: usize,
    /// Records dropped by validation.
    pub skipped_validation: usize,
    /// Records that reached the store.
    pub valid: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Cache entries evicted by this cycle's written span.
    pub evicted: usize,
    /// Watermark position after the cycle, if one was committed.
    pub watermark: Option<DateTime<Utc>>,
}

/// Drives one source against the store.
pub struct Worker {
    source: Box<dyn RecordSource>,
    store: Arc<dyn Store>,
    cache: Option<Arc<QueryCache>>,
    units: Units,
    window: ValidationWindow,
    retry: RetryConfig,
}

impl Worker {
    pub fn new(
        source: Box<dyn RecordSource>,
        store: Arc<dyn Store>,
        units: Units,
        window: ValidationWindow,
        retry: RetryConfig,
    ) -> Self {
        Self {
            source,
            store,
            cache: None,
            units,
            window,
            retry,
        }
    }

    /// Wire a cache so committed writes evict intersecting query results.
    /// Without one, cached readers are bounded by the cache TTL instead.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Run one full cycle. On error the watermark is untouched and the
    /// failure has already been counted and logged.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let source_id = SourceId::new(self.source.name());
        let started = Instant::now();
        let mut phase = CyclePhase::Fetching;

        let outcome = self.cycle(&source_id, &mut phase).await;
        metrics::histogram!("ingest_cycle_duration_seconds").record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(stats) => {
                count_cycle(source_id.as_str(), "ok");
                tracing::debug!(
                    source = %source_id,
                    fetched = stats.fetched,
                    valid = stats.valid,
                    inserted = stats.inserted,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    "cycle complete"
                );
            }
            Err(err) => {
                count_cycle(source_id.as_str(), "error");
                tracing::warn!(
                    source = %source_id,
                    phase = %phase,
                    error = %err,
                    "cycle failed"
                );
            }
        }
        outcome
    }

    async fn cycle(&self, source_id: &SourceId, phase: &mut CyclePhase) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        *phase = CyclePhase::Fetching;
        let since = self
            .store
            .get_watermark(source_id)
            .await?
            .map(|watermark| watermark.position);
        let raw = with_retry(&self.retry, || self.source.fetch(since))
            .await
            .map_err(|err| {
                let kind = if err.is_retryable() { "transient" } else { "permanent" };
                count_fetch_error(source_id.as_str(), kind);
                Error::from(err)
            })?;
        stats.fetched = raw.len();
        metrics::counter!("ingest_records_total", "source" => source_id.as_str().to_owned())
            .increment(stats.fetched as u64);

        *phase = CyclePhase::Parsing;
        let parsed = parse_batch(source_id, raw, self.units);
        stats.skipped_parse = parsed.skipped;

        *phase = CyclePhase::Validating;
        let validated = validate_batch(parsed.records, &self.window);
        stats.skipped_validation = validated.skipped;
        stats.valid = validated.records.len();

        let invalid = stats.skipped_parse + stats.skipped_validation;
        if invalid > 0 {
            metrics::counter!("ingest_records_invalid_total", "source" => source_id.as_str().to_owned())
                .increment(invalid as u64);
        }
        metrics::counter!("ingest_records_valid_total").increment(stats.valid as u64);

        *phase = CyclePhase::Upserting;
        let report = self.store.upsert(&validated.records).await?;
        stats.inserted = report.inserted;
        stats.updated = report.updated;
        stats.unchanged = report.unchanged;
        metrics::counter!("ingest_records_inserted_total").increment(report.inserted as u64);
        metrics::counter!("ingest_records_updated_total").increment(report.updated as u64);
        metrics::counter!("ingest_records_unchanged_total").increment(report.unchanged as u64);

        if let (Some(cache), Some((min, max))) = (self.cache.as_ref(), report.written_span) {
            stats.evicted = cache.invalidate(source_id, min, max).await;
        }

        *phase = CyclePhase::Advancing;
        if let Some(max_observed) = validated.records.iter().map(|r| r.observed_at).max() {
            self.store.set_watermark(source_id, max_observed).await?;
            record_watermark(source_id.as_str(), max_observed);
            stats.watermark = Some(max_observed);
        }

        *phase = CyclePhase::Idle;
        Ok(stats)
    }

    /// Poll until shutdown.
    ///
    /// Successful cycles wait the poll interval. Transient failures back
    /// off exponentially (bounded by the retry cap) so a struggling
    /// upstream or database gets room to recover; permanent failures just
    /// wait for the next scheduled poll. A shutdown signal aborts the
    /// in-flight cycle; its transaction rolls back and the next start
    /// replays from the committed watermark.
    pub async fn run(self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let source = self.source.name().to_owned();

        // Spread start times so sources don't stampede the upstream or
        // the pool together.
        let spread = poll_interval.min(Duration::from_secs(5)).as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=spread));
        tokio::select! {
            _ = tokio::time::sleep(jitter) => {}
            _ = shutdown.changed() => return,
        }

        let mut failures: u32 = 0;
        loop {
            let cycle = self.run_cycle();
            tokio::pin!(cycle);
            let outcome = tokio::select! {
                outcome = &mut cycle => outcome,
                _ = shutdown.changed() => {
                    tracing::info!(source, "worker stopping, in-flight cycle aborted");
                    return;
                }
            };

            let delay = match outcome {
                Ok(stats) => {
                    failures = 0;
                    tracing::info!(
                        source,
                        fetched = stats.fetched,
                        valid = stats.valid,
                        inserted = stats.inserted,
                        updated = stats.updated,
                        unchanged = stats.unchanged,
                        invalid = stats.skipped_parse + stats.skipped_validation,
                        watermark = stats.watermark.map(|t| t.to_rfc3339()),
                        "cycle finished"
                    );
                    poll_interval
                }
                Err(err) if err.is_transient() => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.delay_for_attempt(failures.saturating_sub(1));
                    tracing::warn!(
                        source,
                        state = %CyclePhase::Error,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    delay
                }
                Err(_) => {
                    // Already logged by run_cycle; nothing to do until the
                    // feed or config changes, so keep the normal schedule.
                    failures = failures.saturating_add(1);
                    poll_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    tracing::info!(source, "worker stopping");
                    return;
                }
            }
        }
    }
}

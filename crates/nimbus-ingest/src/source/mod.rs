//! Record source adapters.
//!
//! This module provides adapters for the upstream feeds the worker polls.
//! Each source produces raw JSON items which the parsing and validation
//! phases turn into typed records.
//!
//! # Available Sources
//!
//! - [`HttpSource`] - Polls a remote HTTP feed (JSON array or JSON-lines body)
//! - [`FileSource`] - Reads a local JSON-lines file (used heavily by tests)
//!
//! # Architecture
//!
//! All sources implement the [`RecordSource`] trait, which gives the worker
//! a uniform fetch interface regardless of where records come from. A
//! source only fetches and frames; it never parses fields or validates.

mod file;
mod http;

pub use file::FileSource;
pub use http::HttpSource;

use crate::error::FetchError;
use crate::parse::RawRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A source of raw observation records.
///
/// `fetch` should return records observed at or after `since`; returning
/// more is harmless because upserts are idempotent, while returning fewer
/// loses data. `since` is the caller's committed watermark, so the
/// boundary record is re-fetched on purpose: upstream corrections at that
/// instant still land.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Source identifier (used as the record key, in logs, and in metrics).
    fn name(&self) -> &str;

    /// Fetch one batch of raw items.
    async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawRecord>, FetchError>;
}

/// Split a payload body into raw items.
///
/// Accepts the two framings upstream feeds use: a single JSON array, or
/// JSON-lines (one object per line). A lone JSON object counts as a
/// one-item batch. Blank bodies are empty batches, not errors.
pub(crate) fn split_payload(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| FetchError::Permanent(format!("unparseable JSON array body: {e}")));
    }
    if trimmed.starts_with('{') && !trimmed.contains('\n') {
        let item = serde_json::from_str(trimmed)
            .map_err(|e| FetchError::Permanent(format!("unparseable JSON body: {e}")))?;
        return Ok(vec![item]);
    }
    let mut items = Vec::new();
    for (lineno, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item = serde_json::from_str(line).map_err(|e| {
            FetchError::Permanent(format!("unparseable JSON on line {}: {e}", lineno + 1))
        })?;
        items.push(item);
    }
    Ok(items)
}

/// Best-effort `observed_at` extraction for client-side `since` filtering.
/// Items without a readable timestamp pass through so the parse phase can
/// report them properly.
pub(crate) fn item_at_or_after(item: &RawRecord, since: DateTime<Utc>) -> bool {
    let Some(value) = item.get("observed_at") else {
        return true;
    };
    let observed_at = match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|secs| chrono::TimeZone::timestamp_opt(&Utc, secs, 0).single()),
        _ => None,
    };
    observed_at.is_none_or(|t| t >= since)
}

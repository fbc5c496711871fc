//! The range-query shape shared by the store and the query service.

use chrono::{DateTime, Utc};
use nimbus_core::{Record, SourceId};

/// One page of a range query over a single source.
///
/// Semantics: `from <= observed_at < to`, ordered by `observed_at`
/// ascending. `cursor` is the last key of the previous page; results
/// resume strictly after it (keyset pagination, stable under concurrent
/// writes). `limit` caps the page size.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub source_id: SourceId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Field projection; `None` returns every field.
    pub fields: Option<Vec<String>>,
    pub cursor: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl RecordQuery {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 1000;

    pub fn new(source_id: impl Into<SourceId>, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            from,
            to,
            fields: None,
            cursor: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_cursor(mut self, cursor: DateTime<Utc>) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// An empty range matches nothing and is served without touching
    /// storage or cache.
    pub fn is_empty_range(&self) -> bool {
        self.from >= self.to
    }

    /// Page size clamped to the supported bounds.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    /// Projection with order and duplicates normalized away.
    pub fn normalized_fields(&self) -> Option<Vec<String>> {
        self.fields.as_ref().map(|fields| {
            let mut sorted: Vec<String> = fields.clone();
            sorted.sort();
            sorted.dedup();
            sorted
        })
    }

    /// Canonical cache signature: two queries produce the same results
    /// exactly when their signatures are equal.
    pub fn signature(&self) -> String {
        let fields = match self.normalized_fields() {
            Some(f) => f.join(","),
            None => "*".to_string(),
        };
        let cursor = match self.cursor {
            Some(c) => c.to_rfc3339(),
            None => "-".to_string(),
        };
        format!(
            "records:{}:{}:{}:{}:{}:{}",
            self.source_id,
            self.from.to_rfc3339(),
            self.to.to_rfc3339(),
            fields,
            cursor,
            self.effective_limit(),
        )
    }
}

/// Strip every field not named by the projection.
///
/// A projected record may end up with an empty field map; the record
/// itself is still returned so callers can see the observation happened.
pub(crate) fn apply_projection(records: &mut [Record], projection: &Option<Vec<String>>) {
    if let Some(keep) = projection {
        for record in records.iter_mut() {
            record.fields.retain(|name, _| keep.iter().any(|k| k == name));
        }
    }
}

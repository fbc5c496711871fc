//! Record query endpoint.
//!
//! Serves keyset-paginated pages of observations, cache-first. Parameters
//! arrive as raw strings and are validated here so every rejection comes
//! back as the same `invalid_query` JSON payload instead of the framework
//! default.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use nimbus_core::{Record, SourceId};
use nimbus_store::RecordQuery;

use crate::error::ApiError;
use crate::state::AppState;

// ═══════════════════════════════════════════════════════════════════════════
// Parameters
// ═══════════════════════════════════════════════════════════════════════════

/// Query parameters for `GET /api/v1/records`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordsParams {
    /// Source identifier (required).
    pub source: Option<String>,
    /// Range start, inclusive (required; RFC 3339 or YYYY-MM-DD).
    pub from: Option<String>,
    /// Range end, exclusive (required; RFC 3339 or YYYY-MM-DD).
    pub to: Option<String>,
    /// Comma-separated field projection; omit for every field.
    pub fields: Option<String>,
    /// Resume after this observation timestamp (from `next_cursor`).
    pub cursor: Option<String>,
    /// Page size (default: 100, max: 1000).
    pub limit: Option<String>,
}

/// Response for `GET /api/v1/records`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub records: Vec<Record>,
    /// Present when the page may have a successor; pass back as `cursor`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Translate raw parameters into a store query.
fn build_query(params: &RecordsParams) -> Result<RecordQuery, ApiError> {
    let source = match params.source.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Err(ApiError::InvalidQuery("source is required".into())),
    };
    let from = required_timestamp(params.from.as_deref(), "from")?;
    let to = required_timestamp(params.to.as_deref(), "to")?;
    if from > to {
        return Err(ApiError::InvalidQuery("from must not be after to".into()));
    }

    let mut query = RecordQuery::new(source, from, to);

    if let Some(fields) = &params.fields {
        let names: Vec<String> = fields
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if !names.is_empty() {
            query = query.with_fields(names);
        }
    }

    if let Some(cursor) = params.cursor.as_deref() {
        let cursor = parse_timestamp(cursor)
            .ok_or_else(|| ApiError::InvalidQuery(format!("cursor: cannot parse '{cursor}'")))?;
        query = query.with_cursor(cursor);
    }

    if let Some(limit) = params.limit.as_deref() {
        let limit: usize = limit
            .trim()
            .parse()
            .map_err(|_| ApiError::InvalidQuery(format!("limit: cannot parse '{limit}'")))?;
        if limit == 0 {
            return Err(ApiError::InvalidQuery("limit must be positive".into()));
        }
        query = query.with_limit(limit.min(RecordQuery::MAX_LIMIT));
    }

    Ok(query)
}

fn required_timestamp(value: Option<&str>, name: &str) -> Result<DateTime<Utc>, ApiError> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::InvalidQuery(format!("{name} is required")))?;
    parse_timestamp(raw)
        .ok_or_else(|| ApiError::InvalidQuery(format!("{name}: cannot parse '{raw}'")))
}

/// RFC 3339, or a bare date taken as midnight UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

// ═══════════════════════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════════════════════

/// `GET /api/v1/records?source=&from=&to=&fields=&cursor=&limit=`
///
/// Returns one page of observations with `from <= observed_at < to`,
/// ordered by `observed_at` ascending. `next_cursor` is present when the
/// page ran into the limit; feed it back as `cursor` for the next page.
pub async fn get_records(
    State(state): State<AppState>,
    Query(params): Query<RecordsParams>,
) -> Result<Response, ApiError> {
    metrics::counter!("query_requests_total", "endpoint" => "records").increment(1);
    let query = build_query(&params)?;

    // A degenerate range matches nothing; answer without touching storage.
    if query.is_empty_range() {
        let empty = RecordsResponse {
            records: Vec::new(),
            next_cursor: None,
        };
        return Ok(Json(empty).into_response());
    }

    let signature = query.signature();
    if let Some(cache) = &state.cache {
        if let Some(page) = cache.get(&signature).await {
            metrics::counter!("cache_hits_total").increment(1);
            tracing::debug!(signature = %signature, "cache hit");
            return Ok(cached_body(page.json));
        }
        metrics::counter!("cache_misses_total").increment(1);
    }

    // 404 only checked after a cache miss: a cached page already proves
    // the source existed recently.
    if !source_exists(&state, &query.source_id).await? {
        return Err(ApiError::UnknownSource(query.source_id.to_string()));
    }

    let records = state.store.query(&query).await?;
    let next_cursor = (records.len() == query.effective_limit())
        .then(|| records.last().map(|r| r.observed_at.to_rfc3339()))
        .flatten();
    let response = RecordsResponse {
        records,
        next_cursor,
    };

    if let Some(cache) = &state.cache {
        // A cache failure only costs the next request a store read.
        match serde_json::to_string(&response) {
            Ok(json) => cache.put(&query, json).await,
            Err(err) => tracing::warn!(error = %err, "response not cacheable"),
        }
    }

    Ok(Json(response).into_response())
}

fn cached_body(json: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], json).into_response()
}

/// A source exists once any batch for it has committed. The watermark is
/// the cheap check; records committed before the first watermark advance
/// still count, hence the probe.
async fn source_exists(state: &AppState, source: &SourceId) -> Result<bool, ApiError> {
    if state.store.get_watermark(source).await?.is_some() {
        return Ok(true);
    }
    let (from, to) = probe_range();
    let probe = RecordQuery::new(source.clone(), from, to).with_limit(1);
    Ok(!state.store.query(&probe).await?.is_empty())
}

/// Bounds wide enough for any stored observation. Chrono's own extremes
/// overflow the `timestamptz` range, so stay inside year 1..=9999.
fn probe_range() -> (DateTime<Utc>, DateTime<Utc>) {
    let from = Utc
        .with_ymd_and_hms(1, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    let to = Utc
        .with_ymd_and_hms(9999, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp");
    (from, to)
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use nimbus_core::FieldValue;
    use nimbus_store::{MemStore, Store};
    use std::sync::Arc;

    use crate::state::Config;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(source: &str, secs: i64, temp: f64) -> Record {
        Record::new(
            source,
            ts(secs),
            [
                ("temperature".to_string(), FieldValue::Float(temp)),
                ("wind_speed".to_string(), FieldValue::Float(3.5)),
            ]
            .into_iter()
            .collect(),
        )
    }

    async fn seeded_state(cache_enabled: bool) -> AppState {
        let store = MemStore::new();
        store
            .upsert(&[
                record("s1", 100, 280.0),
                record("s1", 200, 281.0),
                record("s1", 300, 282.0),
            ])
            .await
            .unwrap();
        store.set_watermark(&"s1".into(), ts(300)).await.unwrap();
        let config = Config {
            cache_enabled,
            ..Config::for_tests()
        };
        AppState::new(Arc::new(store), config)
    }

    fn params(source: &str, from: i64, to: i64) -> RecordsParams {
        RecordsParams {
            source: Some(source.to_string()),
            from: Some(ts(from).to_rfc3339()),
            to: Some(ts(to).to_rfc3339()),
            ..Default::default()
        }
    }

    async fn body_of(response: Response) -> RecordsResponse {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn fetch(state: &AppState, params: RecordsParams) -> RecordsResponse {
        let response = get_records(State(state.clone()), Query(params))
            .await
            .unwrap();
        body_of(response).await
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let state = seeded_state(false).await;
        let body = fetch(&state, params("s1", 100, 300)).await;
        assert_eq!(body.records.len(), 2);
        assert_eq!(body.records[0].observed_at, ts(100));
        assert_eq!(body.records[1].observed_at, ts(200));
        assert!(body.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_empty_range_is_ok() {
        let state = seeded_state(false).await;
        let body = fetch(&state, params("s1", 200, 200)).await;
        assert!(body.records.is_empty());
        assert!(body.next_cursor.is_none());

        // Short-circuits before any source lookup.
        let body = fetch(&state, params("never-seen", 200, 200)).await;
        assert!(body.records.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_found() {
        let state = seeded_state(false).await;
        let err = get_records(State(state), Query(params("s9", 0, 1_000)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownSource(_)));
    }

    #[tokio::test]
    async fn test_source_without_watermark_is_found() {
        let store = MemStore::new();
        store.upsert(&[record("s2", 50, 279.0)]).await.unwrap();
        let state = AppState::new(Arc::new(store), Config::for_tests());

        let body = fetch(&state, params("s2", 0, 100)).await;
        assert_eq!(body.records.len(), 1);
    }

    #[tokio::test]
    async fn test_projection_strips_fields() {
        let state = seeded_state(false).await;
        let body = fetch(
            &state,
            RecordsParams {
                fields: Some("temperature".to_string()),
                ..params("s1", 100, 400)
            },
        )
        .await;
        assert_eq!(body.records.len(), 3);
        for record in &body.records {
            assert!(record.fields.contains_key("temperature"));
            assert!(!record.fields.contains_key("wind_speed"));
        }
    }

    #[tokio::test]
    async fn test_pagination_walk() {
        let state = seeded_state(false).await;
        let first = fetch(
            &state,
            RecordsParams {
                limit: Some("2".to_string()),
                ..params("s1", 0, 1_000)
            },
        )
        .await;
        assert_eq!(first.records.len(), 2);
        let cursor = first.next_cursor.clone().unwrap();
        assert_eq!(cursor, ts(200).to_rfc3339());

        let second = fetch(
            &state,
            RecordsParams {
                limit: Some("2".to_string()),
                cursor: Some(cursor),
                ..params("s1", 0, 1_000)
            },
        )
        .await;
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].observed_at, ts(300));
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_cache_serves_identical_page_until_invalidated() {
        let state = seeded_state(true).await;
        let first = fetch(&state, params("s1", 0, 1_000)).await;
        assert_eq!(state.cache.as_ref().unwrap().entry_count().await, 1);

        // Write behind the cache's back: a hit must still serve the old
        // page, which is exactly what proves it came from the cache.
        state
            .store
            .upsert(&[record("s1", 150, 285.0)])
            .await
            .unwrap();
        let cached = fetch(&state, params("s1", 0, 1_000)).await;
        assert_eq!(cached.records.len(), first.records.len());

        // After invalidation the fresh row appears.
        let evicted = state
            .cache
            .as_ref()
            .unwrap()
            .invalidate(&"s1".into(), ts(150), ts(150))
            .await;
        assert_eq!(evicted, 1);
        let fresh = fetch(&state, params("s1", 0, 1_000)).await;
        assert_eq!(fresh.records.len(), first.records.len() + 1);
    }

    #[tokio::test]
    async fn test_cache_and_store_agree() {
        let cached = seeded_state(true).await;
        let direct = seeded_state(false).await;
        let query = || RecordsParams {
            fields: Some("temperature".to_string()),
            limit: Some("2".to_string()),
            ..params("s1", 0, 1_000)
        };

        let warm = fetch(&cached, query()).await;
        let hit = fetch(&cached, query()).await;
        let uncached = fetch(&direct, query()).await;

        let as_json = |r: &RecordsResponse| serde_json::to_value(r).unwrap();
        assert_eq!(as_json(&warm), as_json(&hit));
        assert_eq!(as_json(&hit), as_json(&uncached));
    }

    #[test]
    fn test_build_query_requires_source_and_range() {
        let err = build_query(&RecordsParams::default()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = build_query(&RecordsParams {
            source: Some("s1".into()),
            from: Some("2024-01-01".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));
    }

    #[test]
    fn test_build_query_rejects_bad_inputs() {
        let base = params("s1", 100, 200);

        let err = build_query(&RecordsParams {
            from: Some("yesterday".into()),
            ..base.clone()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = build_query(&RecordsParams {
            from: Some(ts(300).to_rfc3339()),
            ..base.clone()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = build_query(&RecordsParams {
            cursor: Some("not-a-time".into()),
            ..base.clone()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = build_query(&RecordsParams {
            limit: Some("0".into()),
            ..base.clone()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));

        let err = build_query(&RecordsParams {
            limit: Some("many".into()),
            ..base
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidQuery(_)));
    }

    #[test]
    fn test_build_query_accepts_dates_and_clamps_limit() {
        let query = build_query(&RecordsParams {
            source: Some("s1".into()),
            from: Some("2024-01-01".into()),
            to: Some("2024-01-02T12:00:00+02:00".into()),
            fields: Some(" temperature , ,wind_speed ".into()),
            limit: Some("99999".into()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(query.from, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            query.to,
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
        );
        assert_eq!(
            query.fields,
            Some(vec!["temperature".to_string(), "wind_speed".to_string()])
        );
        assert_eq!(query.limit, RecordQuery::MAX_LIMIT);
    }

    #[test]
    fn test_empty_projection_means_all_fields() {
        let query = build_query(&RecordsParams {
            fields: Some(" , ".into()),
            ..params("s1", 0, 100)
        })
        .unwrap();
        assert!(query.fields.is_none());
    }
}

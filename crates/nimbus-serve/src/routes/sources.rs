//! Source listing endpoint.

use axum::extract::State;
use axum::Json;
use nimbus_store::SourceStatus;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Response for `GET /api/v1/sources`.
#[derive(Debug, Serialize)]
pub struct SourcesResponse {
    pub sources: Vec<SourceStatus>,
}

/// `GET /api/v1/sources` - list every known source with its watermark
/// and record count. Sources appear here once their first batch commits.
pub async fn list_sources(
    State(state): State<AppState>,
) -> Result<Json<SourcesResponse>, ApiError> {
    metrics::counter!("query_requests_total", "endpoint" => "sources").increment(1);
    let sources = state.store.list_sources().await?;
    Ok(Json(SourcesResponse { sources }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use nimbus_core::{FieldValue, Record};
    use nimbus_store::{MemStore, Store};
    use std::sync::Arc;

    use crate::state::Config;

    fn state_with(store: MemStore) -> AppState {
        AppState::new(Arc::new(store), Config::for_tests())
    }

    fn record(source: &str, secs: i64) -> Record {
        Record::new(
            source,
            Utc.timestamp_opt(secs, 0).unwrap(),
            [("temperature".to_string(), FieldValue::Float(291.15))]
                .into_iter()
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing() {
        let state = state_with(MemStore::new());
        let Json(body) = list_sources(State(state)).await.unwrap();
        assert!(body.sources.is_empty());
    }

    #[tokio::test]
    async fn test_sources_report_counts_and_watermarks() {
        let store = MemStore::new();
        store
            .upsert(&[record("dwd_10381", 100), record("dwd_10381", 200)])
            .await
            .unwrap();
        store
            .set_watermark(&"dwd_10381".into(), Utc.timestamp_opt(200, 0).unwrap())
            .await
            .unwrap();
        store.upsert(&[record("metar_eddb", 150)]).await.unwrap();

        let state = state_with(store);
        let Json(body) = list_sources(State(state)).await.unwrap();
        assert_eq!(body.sources.len(), 2);

        let dwd = body
            .sources
            .iter()
            .find(|s| s.source_id.as_str() == "dwd_10381")
            .unwrap();
        assert_eq!(dwd.records, 2);
        assert_eq!(
            dwd.watermark.unwrap().position,
            Utc.timestamp_opt(200, 0).unwrap()
        );

        let metar = body
            .sources
            .iter()
            .find(|s| s.source_id.as_str() == "metar_eddb")
            .unwrap();
        assert_eq!(metar.records, 1);
        assert!(metar.watermark.is_none());
    }
}

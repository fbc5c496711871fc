//! API route definitions.

mod health;
mod records;
mod sources;

use axum::http::header;
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub use records::{RecordsParams, RecordsResponse};
pub use sources::SourcesResponse;

/// Build the complete API router.
///
/// # Route Structure
///
/// - `GET /health` - Liveness check
/// - `GET /api/v1/records` - Range query over one source's observations
/// - `GET /api/v1/sources` - All known sources with ingestion progress
pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health::health_check));

    let api_v1 = Router::new()
        .route("/records", get(records::get_records))
        .route("/sources", get(sources::list_sources))
        // Cache headers middleware
        .layer(middleware::map_response(add_cache_headers));

    Router::new()
        .merge(public)
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Add cache headers to API responses.
///
/// Observations change on the ingestion poll cadence, so short CDN and
/// client caching is safe. The window matches the server-side cache TTL.
async fn add_cache_headers(response: Response) -> Response {
    // Only cache successful responses
    if response.status().is_success() {
        let (mut parts, body) = response.into_parts();
        parts.headers.insert(
            header::CACHE_CONTROL,
            "public, max-age=60, stale-while-revalidate=300"
                .parse()
                .expect("valid header value"),
        );
        Response::from_parts(parts, body)
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use nimbus_store::MemStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::state::Config;

    fn app() -> Router {
        router(AppState::new(Arc::new(MemStore::new()), Config::for_tests()))
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_records_rejects_missing_params_as_json() {
        let response = app()
            .oneshot(Request::get("/api/v1/records").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "invalid_query");
    }

    #[tokio::test]
    async fn test_sources_sets_cache_headers() {
        let response = app()
            .oneshot(Request::get("/api/v1/sources").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cache_control = response.headers().get(header::CACHE_CONTROL).unwrap();
        assert!(cache_control.to_str().unwrap().contains("max-age=60"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = app()
            .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

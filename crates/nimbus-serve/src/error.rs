//! API error types and response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
///
/// The `error` field of the JSON body is a stable machine-readable code;
/// clients branch on it, so variants here map to exactly one code each.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed query: bad range, unparseable timestamp or cursor, bad limit.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The requested source has never been ingested.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// Storage failure.
    #[error("database error: {0}")]
    Database(#[from] nimbus_store::StoreError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::InvalidQuery(msg) => {
                metrics::counter!("query_rejected_total").increment(1);
                (StatusCode::BAD_REQUEST, "invalid_query", Some(msg.clone()))
            }
            Self::UnknownSource(source) => {
                metrics::counter!("query_rejected_total").increment(1);
                (
                    StatusCode::NOT_FOUND,
                    "unknown_source",
                    Some(format!("source '{source}' has no records")),
                )
            }
            Self::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    Some("A database error occurred".to_string()),
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

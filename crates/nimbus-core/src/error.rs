//! Error types for record normalization.

use thiserror::Error;

/// Errors raised while turning a raw upstream payload into a [`crate::Record`].
///
/// These are always per-record: the ingestion pipeline logs and counts them,
/// skips the offending record, and keeps going with the rest of the batch.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Payload is not a JSON object.
    #[error("record is not a JSON object")]
    NotAnObject,

    /// The `observed_at` timestamp is missing or unparseable.
    #[error("invalid observed_at: {0}")]
    InvalidTimestamp(String),

    /// Timestamp falls outside the accepted ingestion window.
    #[error("observed_at {observed_at} outside accepted window")]
    OutsideWindow {
        /// The rejected timestamp, RFC 3339.
        observed_at: String,
    },

    /// Source identifier is empty.
    #[error("source id must not be empty")]
    EmptySourceId,

    /// A field failed a structural or range check.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Error Display formatting tests
    // =========================================================================

    #[test]
    fn test_invalid_timestamp_display() {
        let err = ValidationError::InvalidTimestamp("not-a-date".to_string());
        let msg = err.to_string();
        assert!(msg.contains("invalid observed_at"));
        assert!(msg.contains("not-a-date"));
    }

    #[test]
    fn test_outside_window_display() {
        let err = ValidationError::OutsideWindow {
            observed_at: "1999-12-31T23:00:00Z".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("1999-12-31T23:00:00Z"));
        assert!(msg.contains("outside accepted window"));
    }

    #[test]
    fn test_invalid_field_display() {
        let err = ValidationError::InvalidField {
            field: "wind_direction".to_string(),
            reason: "must be between 0 and 360".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("wind_direction"));
        assert!(msg.contains("between 0 and 360"));
    }

    #[test]
    fn test_empty_source_display() {
        let err = ValidationError::EmptySourceId;
        assert!(err.to_string().contains("must not be empty"));
    }

    // =========================================================================
    // Error From conversions
    // =========================================================================

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: ValidationError = json_err.into();
        assert!(matches!(err, ValidationError::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_error_debug_format() {
        let err = ValidationError::InvalidField {
            field: "condition".to_string(),
            reason: "unknown value".to_string(),
        };
        let debug = format!("{:?}", err);
        assert!(debug.contains("InvalidField"));
        assert!(debug.contains("condition"));
    }
}

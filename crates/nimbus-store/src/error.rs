//! Error types for the storage layer.

use thiserror::Error;

/// Errors from the durable store.
///
/// Any of these aborts the operation that raised it; a batch that fails
/// mid-flight rolls back in full. The worker retries on its next cycle,
/// the query service maps the error to a 500.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Could not obtain a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A statement failed or the transaction could not commit.
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A stored field payload could not be decoded.
    #[error("corrupt field payload: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The schema on disk is behind the binaries.
    #[error("schema out of date: expected version {expected}, found {found} (run nimbus-migrate)")]
    SchemaVersion { expected: i32, found: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version_display() {
        let err = StoreError::SchemaVersion {
            expected: 3,
            found: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 1"));
        assert!(msg.contains("nimbus-migrate"));
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(err.to_string().contains("corrupt field payload"));
    }
}

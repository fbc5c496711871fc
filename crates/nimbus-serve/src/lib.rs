//! Nimbus Serve - HTTP query API over the observation store
//!
//! This crate provides a REST API for reading ingested observation records.
//! It is designed for range reads (one source, one time window, one page at
//! a time) rather than arbitrary analytics.
//!
//! # Caching
//!
//! Responses are cached per normalized query signature. Workers running in
//! the same process invalidate entries as they commit; entries otherwise
//! age out on the configured TTL, which is the freshness bound for
//! deployments where ingestion runs in a separate process. Disabling the
//! cache changes latency, never results.
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (store handle, optional cache,
//!   configuration)
//! - **Routes**: Endpoint handlers plus response-header middleware

mod error;
mod routes;
mod state;

pub use self::error::ApiError;
pub use self::routes::{router, RecordsParams, RecordsResponse, SourcesResponse};
pub use self::state::{AppState, Config};

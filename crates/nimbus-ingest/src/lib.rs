//! Nimbus ingestion worker components.
//!
//! This crate turns upstream observation feeds into committed store rows.
//! Each configured source gets its own [`worker::Worker`] polling on a
//! fixed interval.
//!
//! # Modules
//!
//! - [`source`] - Feed adapters (HTTP endpoints, local JSON-lines files)
//! - [`parse`] - Raw JSON items to typed, validated records
//! - [`worker`] - The cycle driver and per-source scheduling
//! - [`retry`] - Bounded exponential backoff for transient failures
//! - [`config`] - Environment-driven worker settings
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  RecordSource   │  (HTTP feeds, replay files)
//! └────────┬────────┘
//!          │ raw JSON items
//!          ▼
//! ┌─────────────────┐
//! │ parse + validate│  typed fields, SI units, structural checks
//! └────────┬────────┘
//!          │ records
//!          ▼
//! ┌─────────────────┐
//! │  Store::upsert  │  one transaction per batch, exact change counts
//! └────────┬────────┘
//!          │ written span
//!          ▼
//! ┌─────────────────┐
//! │ cache + watermark│  evict overlapping pages, advance the cursor
//! └─────────────────┘
//! ```
//!
//! The pipeline is store-first: the watermark only ever reflects records
//! that are durably committed, so a worker killed at any instant resumes
//! without losing or double-counting data.

pub mod config;
pub mod error;
pub mod parse;
pub mod retry;
pub mod source;
pub mod worker;

// Re-export commonly used types at crate root
pub use error::{Error, FetchError, Result};

pub use config::{Config, SourceSpec};
pub use parse::{RawRecord, Units};
pub use retry::{IsRetryable, RetryConfig};
pub use source::{FileSource, HttpSource, RecordSource};
pub use worker::{CyclePhase, CycleStats, Worker};

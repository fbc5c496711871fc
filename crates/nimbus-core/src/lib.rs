//! Core types, validation, and shared utilities for the Nimbus pipeline.
//!
//! This crate provides:
//! - The observation record model and its identity rules
//! - Structural validation and sanitization of raw observations
//! - Unit conversions for feeds publishing conventional units
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod metrics;
mod record;
pub mod units;
mod validate;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Default lower bound for accepted observations: January 1, 2010.
/// The upstream archives publish nothing older; an earlier `observed_at`
/// is a mangled timestamp, not history.
pub const DEFAULT_MIN_OBSERVED_TIMESTAMP: i64 = 1262304000; // 2010-01-01 00:00:00 UTC

pub use error::ValidationError;
pub use record::{fields, FieldValue, Record, SourceId};
pub use validate::{validate, ValidationWindow};

//! Structural validation and sanitization of incoming observations.
//!
//! Validation is per-record: one bad record is rejected (or patched, for
//! the two recoverable cases below) without affecting the rest of its
//! batch. Recoverable cases, matching what upstream feeds actually emit:
//!
//! - negative `precipitation` is a sensor artifact; the field is dropped
//!   with a warning and the record kept
//! - `wind_direction` slightly above 360 wrapped once (430 means 70)

use crate::error::ValidationError;
use crate::record::{fields, FieldValue, Record};
use crate::DEFAULT_MIN_OBSERVED_TIMESTAMP;
use chrono::{DateTime, Utc};

/// Accepted `observed_at` window for ingestion.
///
/// Timestamps before `min` are mangled upstream data; timestamps at or
/// after `max` (when set) are implausible futures.
#[derive(Debug, Clone, Copy)]
pub struct ValidationWindow {
    pub min: DateTime<Utc>,
    pub max: Option<DateTime<Utc>>,
}

impl Default for ValidationWindow {
    fn default() -> Self {
        Self {
            min: DateTime::from_timestamp(DEFAULT_MIN_OBSERVED_TIMESTAMP, 0)
                .unwrap_or(DateTime::UNIX_EPOCH),
            max: None,
        }
    }
}

impl ValidationWindow {
    pub fn new(min: DateTime<Utc>, max: Option<DateTime<Utc>>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.min && self.max.is_none_or(|max| t < max)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

fn numeric(field: &str, value: &FieldValue) -> Result<f64, ValidationError> {
    value.as_f64().ok_or_else(|| invalid(field, "must be numeric"))
}

/// Validate one record in place.
///
/// Returns `Err` when the record must be skipped; mutates `record.fields`
/// for the recoverable sanitization cases.
pub fn validate(record: &mut Record, window: &ValidationWindow) -> Result<(), ValidationError> {
    if record.source_id.is_empty() {
        return Err(ValidationError::EmptySourceId);
    }
    if !window.contains(record.observed_at) {
        return Err(ValidationError::OutsideWindow {
            observed_at: record.observed_at.to_rfc3339(),
        });
    }

    let mut dropped: Vec<String> = Vec::new();
    let mut patched: Vec<(String, FieldValue)> = Vec::new();

    for (name, value) in &record.fields {
        if !value.is_finite() {
            return Err(invalid(name, "must be finite"));
        }
        if let FieldValue::Text(s) = value {
            if s.is_empty() {
                return Err(invalid(name, "must not be empty"));
            }
        }

        match name.as_str() {
            fields::PRECIPITATION => {
                if numeric(name, value)? < 0.0 {
                    tracing::warn!(
                        source = %record.source_id,
                        observed_at = %record.observed_at,
                        "ignoring negative precipitation value"
                    );
                    dropped.push(name.clone());
                }
            }
            fields::WIND_DIRECTION => {
                let mut deg = numeric(name, value)?;
                if deg > 360.0 {
                    tracing::warn!(
                        source = %record.source_id,
                        observed_at = %record.observed_at,
                        wind_direction = deg,
                        "fixing out-of-bounds wind direction"
                    );
                    deg -= 360.0;
                    patched.push((name.clone(), FieldValue::Float(deg)));
                }
                if !(0.0..=360.0).contains(&deg) {
                    return Err(invalid(name, "must be between 0 and 360"));
                }
            }
            fields::SUNSHINE => {
                if numeric(name, value)? < 0.0 {
                    return Err(invalid(name, "must not be negative"));
                }
            }
            fields::RELATIVE_HUMIDITY | fields::CLOUD_COVER => {
                if !(0.0..=100.0).contains(&numeric(name, value)?) {
                    return Err(invalid(name, "must be between 0 and 100"));
                }
            }
            fields::CONDITION => {
                let text = value
                    .as_text()
                    .ok_or_else(|| invalid(name, "must be a string"))?;
                if !fields::CONDITIONS.contains(&text) {
                    return Err(invalid(name, format!("unknown condition '{text}'")));
                }
            }
            fields::TEMPERATURE | fields::PRESSURE_MSL | fields::WIND_SPEED => {
                numeric(name, value)?;
            }
            _ => {}
        }
    }

    for name in dropped {
        record.fields.remove(&name);
    }
    for (name, value) in patched {
        record.fields.insert(name, value);
    }
    Ok(())
}

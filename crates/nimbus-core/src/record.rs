//! The observation record model.
//!
//! A [`Record`] is one measurement reported by one source at one instant.
//! Identity is the natural key `(source_id, observed_at)`; everything else
//! is payload. The upsert rules in the store compare payloads through
//! [`Record::same_fields`], which deliberately ignores `received_at` so
//! that re-ingesting an unchanged observation is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of an upstream observation source (a station or feed).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single typed observation field.
///
/// Serializes as a bare JSON scalar, so a field map round-trips as a plain
/// JSON object both in API responses and in the JSONB storage column.
/// Untagged deserialization tries variants in declaration order: whole
/// numbers become `Int`, everything else with a decimal point `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// False only for non-finite floats (NaN, ±∞).
    pub fn is_finite(&self) -> bool {
        match self {
            FieldValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        FieldValue::Float(f)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_owned())
    }
}

/// Field names the validation and unit-conversion tables know about.
///
/// The record model itself is schema-free: unknown field names flow
/// through ingestion and queries untouched. These constants exist so the
/// range checks and converters agree on spelling.
pub mod fields {
    /// Air temperature, kelvin.
    pub const TEMPERATURE: &str = "temperature";
    /// Mean sea level pressure, pascal.
    pub const PRESSURE_MSL: &str = "pressure_msl";
    /// Wind speed, m/s.
    pub const WIND_SPEED: &str = "wind_speed";
    /// Wind direction, degrees 0..=360.
    pub const WIND_DIRECTION: &str = "wind_direction";
    /// Precipitation, millimetres.
    pub const PRECIPITATION: &str = "precipitation";
    /// Sunshine duration, seconds.
    pub const SUNSHINE: &str = "sunshine";
    /// Relative humidity, percent.
    pub const RELATIVE_HUMIDITY: &str = "relative_humidity";
    /// Cloud cover, percent.
    pub const CLOUD_COVER: &str = "cloud_cover";
    /// Categorical condition.
    pub const CONDITION: &str = "condition";

    /// Accepted values for the `condition` field.
    pub const CONDITIONS: &[&str] = &[
        "dry",
        "fog",
        "rain",
        "sleet",
        "snow",
        "hail",
        "thunderstorm",
    ];
}

/// One ingested observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Source that reported the observation.
    pub source_id: SourceId,
    /// Instant the observation refers to.
    pub observed_at: DateTime<Utc>,
    /// Instant the pipeline first saw this payload. Bookkeeping only;
    /// never part of identity or payload comparison.
    pub received_at: DateTime<Utc>,
    /// Typed measurement fields.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Build a record stamped with the current wall clock as `received_at`.
    pub fn new(
        source_id: impl Into<SourceId>,
        observed_at: DateTime<Utc>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            observed_at,
            received_at: Utc::now(),
            fields,
        }
    }

    /// The natural key identifying this observation.
    pub fn key(&self) -> (&SourceId, DateTime<Utc>) {
        (&self.source_id, self.observed_at)
    }

    /// Payload equality: same field names and values, `received_at` ignored.
    pub fn same_fields(&self, other: &Record) -> bool {
        self.fields == other.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record_with(fields: &[(&str, FieldValue)]) -> Record {
        Record::new(
            "station-1",
            ts(1_700_000_000),
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_natural_key() {
        let r = record_with(&[("temperature", FieldValue::Float(283.15))]);
        let (source, observed) = r.key();
        assert_eq!(source.as_str(), "station-1");
        assert_eq!(observed, ts(1_700_000_000));
    }

    #[test]
    fn test_same_fields_ignores_received_at() {
        let a = record_with(&[("temperature", FieldValue::Float(283.15))]);
        let mut b = a.clone();
        b.received_at = ts(0);
        assert!(a.same_fields(&b));
    }

    #[test]
    fn test_same_fields_detects_value_change() {
        let a = record_with(&[("temperature", FieldValue::Float(283.15))]);
        let b = record_with(&[("temperature", FieldValue::Float(284.15))]);
        assert!(!a.same_fields(&b));
    }

    #[test]
    fn test_same_fields_detects_missing_field() {
        let a = record_with(&[
            ("temperature", FieldValue::Float(283.15)),
            ("wind_speed", FieldValue::Float(3.4)),
        ]);
        let b = record_with(&[("temperature", FieldValue::Float(283.15))]);
        assert!(!a.same_fields(&b));
    }

    #[test]
    fn test_field_value_serializes_as_scalar() {
        assert_eq!(
            serde_json::to_string(&FieldValue::Float(12.5)).unwrap(),
            "12.5"
        );
        assert_eq!(serde_json::to_string(&FieldValue::Int(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&FieldValue::Text("rain".into())).unwrap(),
            "\"rain\""
        );
        assert_eq!(
            serde_json::to_string(&FieldValue::Bool(true)).unwrap(),
            "true"
        );
    }

    #[test]
    fn test_field_value_untagged_parse() {
        let v: FieldValue = serde_json::from_str("42").unwrap();
        assert_eq!(v, FieldValue::Int(42));
        let v: FieldValue = serde_json::from_str("42.5").unwrap();
        assert_eq!(v, FieldValue::Float(42.5));
        let v: FieldValue = serde_json::from_str("\"fog\"").unwrap();
        assert_eq!(v, FieldValue::Text("fog".into()));
        let v: FieldValue = serde_json::from_str("false").unwrap();
        assert_eq!(v, FieldValue::Bool(false));
    }

    #[test]
    fn test_record_json_round_trip() {
        let r = record_with(&[
            ("temperature", FieldValue::Float(283.15)),
            ("condition", FieldValue::Text("dry".into())),
        ]);
        let json = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source_id, r.source_id);
        assert_eq!(back.observed_at, r.observed_at);
        assert!(back.same_fields(&r));
    }

    #[test]
    fn test_is_finite() {
        assert!(FieldValue::Float(1.0).is_finite());
        assert!(FieldValue::Int(i64::MAX).is_finite());
        assert!(FieldValue::Text(String::new()).is_finite());
        assert!(!FieldValue::Float(f64::NAN).is_finite());
        assert!(!FieldValue::Float(f64::INFINITY).is_finite());
    }
}

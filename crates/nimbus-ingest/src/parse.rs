//! Raw payload items to typed records.
//!
//! Sources hand the worker loosely-structured JSON objects; this module
//! turns each into a [`Record`] and filters the batch through the
//! structural checks in [`nimbus_core::validate`]. Failures are always
//! per-record: logged, counted, skipped. A batch with one rotten item
//! still yields every good one.

use chrono::{DateTime, TimeZone, Utc};
use nimbus_core::{units, FieldValue, Record, SourceId, ValidationError, ValidationWindow};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// One unparsed item from a source, in whatever shape the feed sent.
pub type RawRecord = Value;

/// Unit system a source publishes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    /// Kelvin, pascal, m/s, seconds. Stored as-is.
    #[default]
    Si,
    /// °C, hPa, km/h, minutes. Normalized to SI at parse time.
    Conventional,
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "si" => Ok(Units::Si),
            "conventional" => Ok(Units::Conventional),
            other => Err(format!("unknown unit system '{other}' (expected si or conventional)")),
        }
    }
}

/// Outcome of parsing or validating a batch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Records that survived this phase.
    pub records: Vec<Record>,
    /// Items dropped by this phase.
    pub skipped: usize,
}

/// Parse a batch of raw items into records, skipping the unparseable.
pub fn parse_batch(source: &SourceId, raw: Vec<RawRecord>, units: Units) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for item in raw {
        match parse_record(source, &item, units) {
            Ok(record) => outcome.records.push(record),
            Err(err) => {
                outcome.skipped += 1;
                tracing::warn!(source = %source, error = %err, "skipping unparseable record");
            }
        }
    }
    outcome
}

/// Validate parsed records, skipping the invalid.
pub fn validate_batch(records: Vec<Record>, window: &ValidationWindow) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for mut record in records {
        match nimbus_core::validate(&mut record, window) {
            Ok(()) => outcome.records.push(record),
            Err(err) => {
                outcome.skipped += 1;
                tracing::warn!(
                    source = %record.source_id,
                    observed_at = %record.observed_at.to_rfc3339(),
                    error = %err,
                    "skipping invalid record"
                );
            }
        }
    }
    outcome
}

/// Parse one raw item.
///
/// The item must be a JSON object with an `observed_at` key (RFC 3339
/// string or epoch seconds). Every other key becomes a typed field:
/// numbers map to Int/Float, strings to Text, booleans to Bool, nulls are
/// dropped, and nested structures reject the record.
fn parse_record(source: &SourceId, raw: &RawRecord, units: Units) -> Result<Record, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;
    let observed_at = parse_observed_at(obj.get("observed_at"))?;

    let mut fields = BTreeMap::new();
    for (key, value) in obj {
        if key == "observed_at" {
            continue;
        }
        let field = match value {
            Value::Null => continue,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().ok_or_else(|| {
                    ValidationError::InvalidField {
                        field: key.clone(),
                        reason: format!("number {n} does not fit a 64-bit value"),
                    }
                })?),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => {
                return Err(ValidationError::InvalidField {
                    field: key.clone(),
                    reason: "expected a scalar value".into(),
                });
            }
        };
        let field = match units {
            Units::Si => field,
            Units::Conventional => units::convert_conventional(key, field),
        };
        fields.insert(key.clone(), field);
    }

    Ok(Record::new(source.clone(), observed_at, fields))
}

fn parse_observed_at(value: Option<&Value>) -> Result<DateTime<Utc>, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::InvalidTimestamp("missing".into()))?;
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ValidationError::InvalidTimestamp(format!("{s}: {e}"))),
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| ValidationError::InvalidTimestamp(n.to_string()))?;
            Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| ValidationError::InvalidTimestamp(n.to_string()))
        }
        other => Err(ValidationError::InvalidTimestamp(other.to_string())),
    }
}

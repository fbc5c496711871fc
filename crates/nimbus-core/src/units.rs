//! Unit conversions for feeds that publish conventional units.
//!
//! Stored records are always SI: kelvin, pascal, m/s, seconds. Sources
//! flagged as conventional get their well-known fields normalized at parse
//! time through [`convert_conventional`]; unknown fields pass through.

use crate::record::{fields, FieldValue};

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// °C → K, rounded to two decimals.
pub fn celsius_to_kelvin(temperature: f64) -> f64 {
    round_to(temperature + 273.15, 2)
}

/// hPa → Pa.
pub fn hpa_to_pa(pressure: f64) -> f64 {
    pressure * 100.0
}

/// km/h → m/s, rounded to one decimal.
pub fn kmh_to_ms(speed: f64) -> f64 {
    round_to(speed / 3.6, 1)
}

/// Minutes → whole seconds.
pub fn minutes_to_seconds(minutes: f64) -> i64 {
    (minutes * 60.0).round() as i64
}

/// Normalize one field value from conventional units to SI.
///
/// Applies only to fields with a registered converter; everything else is
/// returned unchanged. Non-numeric values are never converted.
pub fn convert_conventional(field: &str, value: FieldValue) -> FieldValue {
    let Some(n) = value.as_f64() else {
        return value;
    };
    match field {
        fields::TEMPERATURE => FieldValue::Float(celsius_to_kelvin(n)),
        fields::PRESSURE_MSL => FieldValue::Float(hpa_to_pa(n)),
        fields::WIND_SPEED => FieldValue::Float(kmh_to_ms(n)),
        fields::SUNSHINE => FieldValue::Int(minutes_to_seconds(n)),
        _ => value,
    }
}

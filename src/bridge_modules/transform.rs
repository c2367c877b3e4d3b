use serde::Deserialize;
use serde_json::{Number, Value};

/// Post-processing applied to an extracted value before it is published.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(from = "Option<String>")]
pub enum Transform {
    #[default]
    None,
    /// Ratios in `0..=1` become percentages; anything else is only rounded.
    PercentToHundred,
    /// A number of seconds rendered as `HH:MM:SS`.
    SecondsToHms,
}

impl From<Option<String>> for Transform {
    fn from(name: Option<String>) -> Self {
        match name.as_deref() {
            Some("percent_0_1_to_0_100") => Transform::PercentToHundred,
            Some("seconds_to_hms") => Transform::SecondsToHms,
            // Unknown names pass values through untouched.
            _ => Transform::None,
        }
    }
}

/// Applies `transform` to an extracted value.
///
/// Absent and JSON `null` values stay absent. When the value cannot be coerced
/// to a number the original value is returned unchanged.
pub fn transform_value(value: Option<Value>, transform: Transform) -> Option<Value> {
    let value = value.filter(|v| !v.is_null())?;

    let transformed = match transform {
        Transform::None => None,
        Transform::PercentToHundred => coerce_f64(&value).and_then(|v| {
            let scaled = if (0.0..=1.0).contains(&v) {
                round2(v * 100.0)
            } else {
                round2(v)
            };
            Number::from_f64(scaled).map(Value::Number)
        }),
        Transform::SecondsToHms => coerce_f64(&value)
            .filter(|v| v.is_finite())
            .map(|v| Value::String(format_hms(v.trunc() as i64))),
    };

    Some(transformed.unwrap_or(value))
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Floor division keeps minutes and seconds in `0..60` for negative inputs.
fn format_hms(total_seconds: i64) -> String {
    let hours = total_seconds.div_euclid(3600);
    let minutes = total_seconds.rem_euclid(3600) / 60;
    let seconds = total_seconds.rem_euclid(60);
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

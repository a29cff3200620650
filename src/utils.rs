use chrono::{DateTime, Utc};

/// Parse a float out of loosely formatted vendor text.
///
/// Surrounding whitespace is ignored; anything that does not parse (including
/// an empty string) becomes `None`, never an error.
pub fn loose_f64(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

/// Parse an integer the way the console emits them: possibly with a decimal
/// part ("1700000000.0"), which truncates toward zero.
pub fn loose_i64(text: &str) -> Option<i64> {
    let value = loose_f64(text)?;
    if value.is_finite() { Some(value.trunc() as i64) } else { None }
}

/// Human-readable UTC timestamp used in status lines and context text.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

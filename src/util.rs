//! Small shared helpers: wall-clock stamps and tolerant numeric parsing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Wall-clock unix seconds as f64 (record timestamps).
pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Unix milliseconds (order nonces).
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parse a float out of a JSON value that may be a number or a numeric
/// string. Vendor payloads use both encodings interchangeably.
pub fn safe_f64(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

/// `safe_f64` for an object field.
pub fn f64_field(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(safe_f64)
}

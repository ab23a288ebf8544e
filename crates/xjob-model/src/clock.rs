use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as a UNIX timestamp in milliseconds.
///
/// A clock set before the epoch reads as `0`.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

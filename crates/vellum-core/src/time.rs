//! Wall-clock helpers. All timestamps are Unix milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current time in milliseconds.
///
/// A clock set before the epoch reads as 0.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

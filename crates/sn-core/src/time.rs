//! Wall-clock helpers for status timestamps

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds.
///
/// A clock set before the epoch reads as 0 rather than panicking; session
/// timestamps are informational.
///
/// # Examples
/// ```
/// use sn_core::time::current_time_millis;
///
/// assert!(current_time_millis() > 0);
/// ```
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds elapsed since `since`; 0 if `since` is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Elapsed time since a millisecond timestamp.
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(elapsed_millis(since_millis))
}

//! Wall-clock helpers. All timestamps on the wire are absolute Unix microseconds.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as Unix microseconds.
///
/// A clock set before the epoch yields 0.
#[inline]
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Converts a period to whole microseconds, saturating at `i64::MAX`.
#[inline]
pub fn duration_micros(period: Duration) -> i64 {
    i64::try_from(period.as_micros()).unwrap_or(i64::MAX)
}

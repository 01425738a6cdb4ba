//! Conversion between `SystemTime` and the 64-bit FILETIME values used in
//! `PRJ_FILE_BASIC_INFO`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between 1601-01-01 and 1970-01-01.
const EPOCH_DIFF_SECS: i64 = 11_644_473_600;
const TICKS_PER_SEC: i64 = 10_000_000;

/// Convert a `SystemTime` into 100ns ticks since 1601-01-01 UTC.
///
/// Times before the Unix epoch clamp to the epoch.
pub fn to_filetime(time: SystemTime) -> i64 {
    let since_unix: Duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let secs: i64 = since_unix.as_secs() as i64;

    (secs + EPOCH_DIFF_SECS) * TICKS_PER_SEC + i64::from(since_unix.subsec_nanos() / 100)
}

/// Convert 100ns ticks since 1601-01-01 UTC into a `SystemTime`.
pub fn from_filetime(ticks: i64) -> SystemTime {
    let unix_ticks: i64 = ticks - EPOCH_DIFF_SECS * TICKS_PER_SEC;
    if unix_ticks <= 0 {
        return UNIX_EPOCH;
    }

    let secs: u64 = (unix_ticks / TICKS_PER_SEC) as u64;
    let nanos: u32 = ((unix_ticks % TICKS_PER_SEC) * 100) as u32;
    UNIX_EPOCH + Duration::new(secs, nanos)
}

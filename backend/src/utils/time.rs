use chrono::{DateTime, Duration, Utc};
use std::time::SystemTime;

/// Returns the current UTC time. Audit timestamps are always stored in UTC.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Oldest instant that is still retained for a window of `retention_days`.
/// A non-positive window means records are kept forever.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> Option<DateTime<Utc>> {
    if retention_days <= 0 {
        return None;
    }
    Duration::try_days(retention_days).and_then(|window| now.checked_sub_signed(window))
}

/// Converts a filesystem timestamp for comparison with a cutoff.
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Seconds since the Unix epoch, zero if the clock is before it
pub(crate) fn now_unix_secs() -> u64 {
    unix_secs(SystemTime::now())
}

pub(crate) fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// Time elapsed between `created` and `now`.
///
/// A creation time in the future (clock skew between store and controller)
/// counts as zero age.
pub(crate) fn age(
    created: SystemTime,
    now: SystemTime,
) -> Duration {
    now.duration_since(created).unwrap_or_default()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns `now_unix_ms` advanced by `minutes`, saturating on overflow.
pub fn unix_ms_plus_minutes(now_unix_ms: u64, minutes: u64) -> u64 {
    now_unix_ms.saturating_add(minutes.saturating_mul(60_000))
}

/// Returns `now_unix_ms` advanced by `days`, saturating on overflow.
pub fn unix_ms_plus_days(now_unix_ms: u64, days: u64) -> u64 {
    now_unix_ms.saturating_add(days.saturating_mul(86_400_000))
}

/// Returns the start of a rolling window `window_minutes` long ending at
/// `now_unix_ms`, saturating at the epoch.
pub fn unix_ms_window_start(now_unix_ms: u64, window_minutes: u64) -> u64 {
    now_unix_ms.saturating_sub(window_minutes.saturating_mul(60_000))
}

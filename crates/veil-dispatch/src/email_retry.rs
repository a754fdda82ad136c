use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// Base delay for the provider-send retry loop.
pub const PROVIDER_BASE_BACKOFF_MS: u64 = 500;
/// Email/API sends get a fixed small retry budget; exhaustion falls through
/// to the router's channel fallback, never an unbounded loop here.
pub const PROVIDER_MAX_SEND_ATTEMPTS: u32 = 3;

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Retryable provider responses: explicit throttling and server-side
/// failures. Every other 4xx is treated as permanent for this channel.
pub fn should_retry_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Deterministic exponential backoff for `attempt` (zero-based).
pub fn next_backoff_ms(attempt: u32) -> u64 {
    let shift = attempt.min(6);
    PROVIDER_BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

/// Backoff with bounded jitter in [50%, 100%] of the deterministic delay.
pub fn next_backoff_ms_with_jitter(attempt: u32, jitter_enabled: bool) -> u64 {
    let base = next_backoff_ms(attempt);
    if !jitter_enabled || base <= 1 {
        return base;
    }

    let low = base / 2;
    let width = base.saturating_sub(low);
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
    let jitter = if width == 0 {
        0
    } else {
        mixed % width.saturating_add(1)
    };
    low.saturating_add(jitter)
}

/// Parses a Retry-After header into milliseconds, accepting both delta
/// seconds and HTTP dates.
pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let now = Utc::now();
    let delay_ms = retry_at.signed_duration_since(now).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }

    u64::try_from(delay_ms).ok()
}

/// Delay before the next provider attempt, honoring a server-supplied
/// Retry-After as a floor.
pub fn provider_retry_delay_ms(
    attempt: u32,
    jitter_enabled: bool,
    retry_after_ms: Option<u64>,
) -> u64 {
    let backoff_ms = next_backoff_ms_with_jitter(attempt, jitter_enabled);
    match retry_after_ms {
        Some(retry_after_ms) => backoff_ms.max(retry_after_ms),
        None => backoff_ms,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{
        next_backoff_ms, next_backoff_ms_with_jitter, parse_retry_after_ms,
        provider_retry_delay_ms, should_retry_status,
    };

    #[test]
    fn unit_retry_statuses_cover_throttle_and_server_errors_only() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(500));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
        assert!(!should_retry_status(409));
        assert!(!should_retry_status(422));
    }

    #[test]
    fn unit_backoff_doubles_per_attempt() {
        assert_eq!(next_backoff_ms(0), 500);
        assert_eq!(next_backoff_ms(1), 1_000);
        assert_eq!(next_backoff_ms(2), 2_000);
        assert_eq!(next_backoff_ms(12), next_backoff_ms(6));
    }

    #[test]
    fn unit_jittered_backoff_stays_within_expected_bounds() {
        let attempt = 2;
        let base = next_backoff_ms(attempt);
        let low = base / 2;
        for _ in 0..64 {
            let value = next_backoff_ms_with_jitter(attempt, true);
            assert!(value >= low, "expected {value} >= {low}");
            assert!(value <= base, "expected {value} <= {base}");
        }
    }

    #[test]
    fn unit_parse_retry_after_ms_accepts_seconds_and_rejects_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after_ms(&headers), Some(3_000));

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn functional_parse_retry_after_ms_accepts_http_dates() {
        let mut headers = HeaderMap::new();
        let raw = (Utc::now() + Duration::seconds(2))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(raw.as_str()).expect("retry-after date"),
        );
        let delay = parse_retry_after_ms(&headers).expect("delay from date");
        assert!(delay <= 2_500, "delay should be close to 2s, got {delay}");
    }

    #[test]
    fn regression_retry_delay_honors_retry_after_floor() {
        assert_eq!(provider_retry_delay_ms(0, false, None), 500);
        assert_eq!(provider_retry_delay_ms(2, false, Some(100)), 2_000);
        assert_eq!(provider_retry_delay_ms(0, false, Some(5_000)), 5_000);
    }
}

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_SHIFT: usize = 5;

static JITTER_SEED: AtomicU64 = AtomicU64::new(1);

/// Returns true for statuses the assistant API documents as transient.
pub fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub fn next_backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

fn jittered(base_ms: u64) -> u64 {
    if base_ms <= 1 {
        return base_ms;
    }
    // Keep the delay in [base/2, base].
    let floor = base_ms / 2;
    let seed = JITTER_SEED.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(23);
    floor.saturating_add(mixed % (base_ms - floor + 1))
}

/// Picks the sleep before retry `attempt`, never shorter than a server `Retry-After`.
pub fn retry_delay_ms(attempt: usize, jitter: bool, retry_after_ms: Option<u64>) -> u64 {
    let backoff = if jitter {
        jittered(next_backoff_ms(attempt))
    } else {
        next_backoff_ms(attempt)
    };
    retry_after_ms.map_or(backoff, |floor| backoff.max(floor))
}

pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{next_backoff_ms, parse_retry_after_ms, retry_delay_ms, should_retry_status};

    #[test]
    fn unit_retryable_statuses_cover_throttling_and_server_errors() {
        for status in [408, 409, 425, 429, 500, 502, 503] {
            assert!(should_retry_status(status), "{status} should retry");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!should_retry_status(status), "{status} should not retry");
        }
    }

    #[test]
    fn unit_backoff_doubles_and_caps() {
        assert_eq!(next_backoff_ms(0), 250);
        assert_eq!(next_backoff_ms(1), 500);
        assert_eq!(next_backoff_ms(5), 8_000);
        assert_eq!(next_backoff_ms(40), 8_000);
    }

    #[test]
    fn functional_jittered_delay_stays_in_half_open_window() {
        for _ in 0..64 {
            let delay = retry_delay_ms(2, true, None);
            assert!((500..=1_000).contains(&delay), "unexpected delay {delay}");
        }
    }

    #[test]
    fn regression_retry_after_header_sets_a_floor() {
        assert_eq!(retry_delay_ms(0, false, Some(3_000)), 3_000);
        assert_eq!(retry_delay_ms(3, false, Some(10)), 2_000);
    }

    #[test]
    fn unit_parse_retry_after_accepts_seconds_and_dates() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(parse_retry_after_ms(&headers), Some(2_000));

        let raw = (Utc::now() + Duration::seconds(3))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(&raw).expect("retry-after date"),
        );
        let delay = parse_retry_after_ms(&headers).expect("date delay");
        assert!(delay <= 3_500 && delay >= 1_000, "unexpected delay {delay}");

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }
}

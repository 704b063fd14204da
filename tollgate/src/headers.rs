//! Rate limiting response headers
//!
//! ```text
//! X-RateLimit-Limit: <max requests>
//! X-RateLimit-Remaining: <remaining>
//! X-RateLimit-Reset: <ISO-8601 instant>
//! Retry-After: <seconds>              (only on rejection)
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use tollgate_store::Decision;

pub use http::header::RETRY_AFTER;

/// `X-RateLimit-Limit` header name
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// `X-RateLimit-Remaining` header name
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// `X-RateLimit-Reset` header name
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Formats milliseconds since the Unix epoch as an ISO-8601 UTC instant
/// with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
///
/// Returns `None` for instants `chrono` cannot represent.
#[inline]
pub fn format_instant(millis: u64) -> Option<String> {
    let millis = i64::try_from(millis).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Builds the informational headers for a decision.
pub(crate) fn limit_headers(decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(4);
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit()));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(decision.remaining()));

    if let Some(reset) = format_instant(decision.reset_at())
        .and_then(|reset| HeaderValue::try_from(reset).ok()) {
        headers.insert(X_RATELIMIT_RESET.clone(), reset);
    }
    headers
}

/// Builds the informational headers plus `Retry-After` for a rejected decision.
pub(crate) fn rejection_headers(decision: &Decision) -> HeaderMap {
    let mut headers = limit_headers(decision);
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tollgate_store::{ManualTimeSource, SlidingWindowStore, WindowStore};

    // 2024-05-01T12:00:00Z
    const NOON: u64 = 1_714_564_800_000;

    fn decisions(limit: u32, calls: u32) -> Vec<Decision> {
        let store = SlidingWindowStore::with_time_source(ManualTimeSource::new(NOON));
        (0..calls)
            .map(|_| store.check_and_record("k", Duration::from_secs(60), limit).unwrap())
            .collect()
    }

    #[test]
    fn it_formats_iso_8601_with_millis() {
        assert_eq!(format_instant(NOON).unwrap(), "2024-05-01T12:00:00.000Z");
        assert_eq!(format_instant(NOON + 1_234).unwrap(), "2024-05-01T12:00:01.234Z");
        assert_eq!(format_instant(0).unwrap(), "1970-01-01T00:00:00.000Z");
        assert!(format_instant(u64::MAX).is_none());
    }

    #[test]
    fn it_builds_limit_headers_for_allowed_decision() {
        let decision = decisions(3, 1)[0];
        let headers = limit_headers(&decision);

        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "3");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "2");
        assert_eq!(headers.get("X-RateLimit-Reset").unwrap(), "2024-05-01T12:01:00.000Z");
        assert!(headers.get(RETRY_AFTER).is_none());
    }

    #[test]
    fn it_adds_retry_after_for_rejected_decision() {
        let decision = decisions(1, 2)[1];
        let headers = rejection_headers(&decision);

        assert!(!decision.is_allowed());
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "1");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert_eq!(headers.get("Retry-After").unwrap(), "60");
    }
}

//! Retry policy and backoff computation
//!
//! Delays come from one of two places: a `Retry-After` header on a 429, used
//! verbatim, or exponential backoff `base * 2^attempt` plus jitter drawn from
//! `[0, backoff / 2)`.

use crate::error::{Error, Result};
use crate::types::{Suspension, RETRY_AFTER_HEADER};
use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry limits and base delay, immutable once built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base for exponential backoff. Zero disables delays entirely.
    pub base_delay: Duration,
    /// Retries allowed for 429 responses
    pub max_rate_limit_retries: u32,
    /// Retries allowed for 5xx responses
    pub max_server_error_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_rate_limit_retries: 10,
            max_server_error_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_rate_limit_retries: u32, max_server_error_retries: u32) -> Self {
        Self {
            base_delay,
            max_rate_limit_retries,
            max_server_error_retries,
        }
    }

    /// Retry immediately, keeping the default retry budgets
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Exponential backoff for the given attempt, plus jitter
    pub fn backoff(&self, attempt: u32, jitter: &dyn Jitter) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let spread = backoff / 2;
        if spread.is_zero() {
            return backoff;
        }

        backoff.saturating_add(jitter.sample(spread))
    }

    /// Delay before retrying a 429: `Retry-After` when present and parseable,
    /// otherwise exponential backoff
    pub fn rate_limit_delay(&self, headers: &HeaderMap, attempt: u32, jitter: &dyn Jitter) -> Duration {
        retry_after(headers, Utc::now()).unwrap_or_else(|| self.backoff(attempt, jitter))
    }
}

// ============================================================================
// Jitter
// ============================================================================

/// Source of random jitter
pub trait Jitter: Send + Sync {
    /// A duration in `[0, upper)`
    fn sample(&self, upper: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, upper: Duration) -> Duration {
        let nanos = u64::try_from(upper.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
    }
}

/// Always zero
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn sample(&self, _upper: Duration) -> Duration {
        Duration::ZERO
    }
}

// ============================================================================
// Retry-After
// ============================================================================

/// Parse `Retry-After` as delta-seconds or an HTTP date relative to `now`.
///
/// Negative seconds and dates in the past clamp to zero.
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER_HEADER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        return Some(Duration::from_secs(seconds.max(0).unsigned_abs()));
    }

    let at = parse_http_date(value)?;
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// IMF-fixdate, plus the obsolete RFC 850 and asctime forms
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Interruptible Sleep
// ============================================================================

/// Sleep for `delay` unless `cancel` fires first.
///
/// A token that is already cancelled wins even over a zero delay.
pub async fn sleep(delay: Duration, cancel: &CancellationToken, during: Suspension) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::interrupted(during)),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;
    use test_case::test_case;

    /// Always returns the top of the range
    struct MaxJitter;

    impl Jitter for MaxJitter {
        fn sample(&self, upper: Duration) -> Duration {
            upper - Duration::from_nanos(1)
        }
    }

    fn retry_after_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_rate_limit_retries, 10);
        assert_eq!(policy.max_server_error_retries, 3);
    }

    #[test_case(0, 100 ; "first attempt")]
    #[test_case(1, 200 ; "second attempt")]
    #[test_case(2, 400 ; "third attempt")]
    #[test_case(3, 800 ; "fourth attempt")]
    fn test_backoff_exponential_without_jitter(attempt: u32, expected_ms: u64) {
        let policy = RetryPolicy::new(Duration::from_millis(100), 10, 3);
        assert_eq!(
            policy.backoff(attempt, &NoJitter),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_backoff_jitter_stays_below_half() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 10, 3);
        let delay = policy.backoff(2, &MaxJitter);
        assert!(delay >= Duration::from_millis(400));
        assert!(delay < Duration::from_millis(600));
    }

    #[test]
    fn test_backoff_random_jitter_range() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 10, 3);
        for _ in 0..100 {
            let delay = policy.backoff(1, &RandomJitter);
            assert!(delay >= Duration::from_millis(20));
            assert!(delay < Duration::from_millis(30));
        }
    }

    #[test]
    fn test_backoff_zero_base_is_immediate() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.backoff(5, &MaxJitter), Duration::ZERO);
    }

    #[test]
    fn test_backoff_without_jitter_range() {
        let policy = RetryPolicy::new(Duration::from_nanos(1), 10, 3);
        assert_eq!(policy.backoff(0, &MaxJitter), Duration::from_nanos(1));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 10, 3);
        assert!(policy.backoff(64, &NoJitter) >= Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test_case("0", Some(0) ; "zero seconds")]
    #[test_case("120", Some(120) ; "integer seconds")]
    #[test_case("-5", Some(0) ; "negative clamps to zero")]
    #[test_case(" 7 ", Some(7) ; "surrounding whitespace")]
    #[test_case("Fri, 01 Mar 2024 12:00:30 GMT", Some(30) ; "imf fixdate")]
    #[test_case("Friday, 01-Mar-24 12:01:00 GMT", Some(60) ; "rfc 850 date")]
    #[test_case("Fri Mar  1 12:00:10 2024", Some(10) ; "asctime date")]
    #[test_case("Fri, 01 Mar 2024 11:59:50 GMT", Some(0) ; "past date clamps to zero")]
    #[test_case("soon", None ; "unparseable")]
    fn test_retry_after(value: &str, expected_secs: Option<u64>) {
        let headers = retry_after_header(value);
        assert_eq!(
            retry_after(&headers, fixed_now()),
            expected_secs.map(Duration::from_secs)
        );
    }

    #[test]
    fn test_retry_after_missing() {
        assert_eq!(retry_after(&HeaderMap::new(), fixed_now()), None);
    }

    #[test]
    fn test_rate_limit_delay_prefers_header() {
        let policy = RetryPolicy::default();
        let delay = policy.rate_limit_delay(&retry_after_header("120"), 4, &MaxJitter);
        assert_eq!(delay, Duration::from_secs(120));
    }

    #[test]
    fn test_rate_limit_delay_falls_back_to_backoff() {
        let policy = RetryPolicy::new(Duration::from_millis(100), 10, 3);
        let delay = policy.rate_limit_delay(&HeaderMap::new(), 1, &NoJitter);
        assert_eq!(delay, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let start = tokio::time::Instant::now();
        sleep(Duration::from_secs(3), &CancellationToken::new(), Suspension::RetryBackoff)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_sleep_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sleep(Duration::ZERO, &cancel, Suspension::RetryBackoff)
            .await
            .unwrap_err();
        assert!(err.is_interrupted());
    }

    #[tokio::test]
    async fn test_sleep_cancelled_midway() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let err = sleep(Duration::from_secs(60), &cancel, Suspension::RetryBackoff)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Interrupted {
                during: Suspension::RetryBackoff
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

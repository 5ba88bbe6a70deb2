//! Quota-tracking rate limiter
//!
//! Tracks the quota a server declares through `X-RateLimit-*` headers. A
//! reactive limiter only records what it sees; a proactive limiter also
//! throttles callers so the remaining allowance is spread evenly over the rest
//! of the window instead of being burst through.
//!
//! This is best-effort smoothing, not a token bucket.

use super::backoff::sleep;
use crate::error::Result;
use crate::types::{LimiterMode, Suspension, RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER};
use reqwest::header::HeaderMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Configuration for a rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Quota ceiling assumed until the server reports one
    pub limit: i64,
    /// Length of the quota window
    pub window: Duration,
    /// Reactive or proactive
    pub mode: LimiterMode,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::reactive()
    }
}

impl RateLimiterConfig {
    /// Create a new rate limiter config
    pub fn new(limit: i64, window: Duration, mode: LimiterMode) -> Self {
        Self {
            limit,
            window,
            mode,
        }
    }

    /// 100 requests per 15 seconds, record only
    pub fn reactive() -> Self {
        Self::new(100, Duration::from_secs(15), LimiterMode::Reactive)
    }

    /// 100 requests per 15 minutes, self-throttling
    pub fn proactive() -> Self {
        Self::new(100, Duration::from_secs(15 * 60), LimiterMode::Proactive)
    }
}

/// Point-in-time copy of a limiter's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: Option<Instant>,
}

#[derive(Debug)]
struct RateLimiterState {
    limit: i64,
    remaining: i64,
    reset_at: Option<Instant>,
}

/// Rate limiter driven by server-reported quota headers
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    mode: LimiterMode,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config
    pub fn new(config: &RateLimiterConfig) -> Self {
        Self {
            window: config.window,
            mode: config.mode,
            state: Mutex::new(RateLimiterState {
                limit: config.limit,
                remaining: config.limit,
                reset_at: None,
            }),
        }
    }

    /// A limiter that only records state
    pub fn reactive(limit: i64, window: Duration) -> Self {
        Self::new(&RateLimiterConfig::new(limit, window, LimiterMode::Reactive))
    }

    /// A limiter that throttles in [`wait`](Self::wait)
    pub fn proactive(limit: i64, window: Duration) -> Self {
        Self::new(&RateLimiterConfig::new(limit, window, LimiterMode::Proactive))
    }

    fn lock(&self) -> MutexGuard<'_, RateLimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the quota reported by a response.
    ///
    /// The reset time only advances when the quota has started being consumed
    /// and the previous window has already run out.
    pub fn update_from_headers(&self, headers: &HeaderMap) {
        let limit = header_i64(headers, RATE_LIMIT_LIMIT_HEADER);
        let remaining = header_i64(headers, RATE_LIMIT_REMAINING_HEADER);
        if limit.is_none() && remaining.is_none() {
            return;
        }

        let now = Instant::now();
        let mut state = self.lock();
        if let Some(limit) = limit {
            state.limit = limit;
        }
        if let Some(remaining) = remaining {
            state.remaining = remaining;
        }

        let window_elapsed = state.reset_at.map_or(true, |reset| now >= reset);
        if state.remaining < state.limit && window_elapsed {
            if let Some(reset) = now.checked_add(self.window) {
                state.reset_at = Some(reset);
            }
        }

        let (limit, remaining) = (state.limit, state.remaining);
        drop(state);
        debug!(limit, remaining, "Rate limit updated");
    }

    /// Throttle before a request. A no-op for reactive limiters.
    ///
    /// With the quota exhausted this sleeps until the window resets; otherwise
    /// it sleeps for one share of the time left in the window. The lock is
    /// released before sleeping.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        if self.mode == LimiterMode::Reactive {
            return Ok(());
        }

        let Some(delay) = self.throttle_delay(Instant::now()) else {
            return Ok(());
        };

        debug!(delay_ms = delay.as_millis() as u64, "Throttling request");
        sleep(delay, cancel, Suspension::RateLimitWait).await
    }

    fn throttle_delay(&self, now: Instant) -> Option<Duration> {
        let state = self.lock();
        let reset_at = state.reset_at?;
        if now >= reset_at {
            return None;
        }

        let time_left = reset_at - now;
        if state.remaining <= 0 {
            return Some(time_left);
        }
        if state.remaining >= state.limit {
            return None;
        }

        let shares = u32::try_from(state.remaining).unwrap_or(u32::MAX);
        Some(time_left / shares)
    }

    pub fn remaining(&self) -> i64 {
        self.lock().remaining
    }

    pub fn limit(&self) -> i64 {
        self.lock().limit
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.lock().reset_at
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let state = self.lock();
        RateLimitSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn mode(&self) -> LimiterMode {
        self.mode
    }

    pub fn is_proactive(&self) -> bool {
        self.mode == LimiterMode::Proactive
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimiterConfig::default())
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod rate_limit_tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn quota(limit: Option<&str>, remaining: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(limit) = limit {
            headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from_str(limit).unwrap());
        }
        if let Some(remaining) = remaining {
            headers.insert(
                RATE_LIMIT_REMAINING_HEADER,
                HeaderValue::from_str(remaining).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_rate_limiter_config_presets() {
        let reactive = RateLimiterConfig::reactive();
        assert_eq!(reactive.limit, 100);
        assert_eq!(reactive.window, Duration::from_secs(15));
        assert_eq!(reactive.mode, LimiterMode::Reactive);

        let proactive = RateLimiterConfig::proactive();
        assert_eq!(proactive.limit, 100);
        assert_eq!(proactive.window, Duration::from_secs(900));
        assert_eq!(proactive.mode, LimiterMode::Proactive);
    }

    #[tokio::test]
    async fn test_update_from_headers() {
        let limiter = RateLimiter::default();
        limiter.update_from_headers(&quota(Some("100"), Some("50")));

        assert_eq!(limiter.limit(), 100);
        assert_eq!(limiter.remaining(), 50);
        assert!(limiter.reset_at().is_some());
    }

    #[tokio::test]
    async fn test_update_without_headers_keeps_state() {
        let limiter = RateLimiter::reactive(100, Duration::from_secs(15));
        limiter.update_from_headers(&HeaderMap::new());

        assert_eq!(limiter.remaining(), 100);
        assert!(limiter.reset_at().is_none());
    }

    #[tokio::test]
    async fn test_full_quota_does_not_start_window() {
        let limiter = RateLimiter::reactive(100, Duration::from_secs(15));
        limiter.update_from_headers(&quota(Some("100"), Some("100")));
        assert!(limiter.reset_at().is_none());
    }

    #[tokio::test]
    async fn test_negative_remaining_stored_as_is() {
        let limiter = RateLimiter::reactive(100, Duration::from_secs(15));
        limiter.update_from_headers(&quota(None, Some("-3")));
        assert_eq!(limiter.remaining(), -3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_only_advances_after_window_elapses() {
        let limiter = RateLimiter::reactive(100, Duration::from_secs(15));
        limiter.update_from_headers(&quota(Some("100"), Some("99")));
        let first = limiter.reset_at().unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        limiter.update_from_headers(&quota(Some("100"), Some("98")));
        assert_eq!(limiter.reset_at(), Some(first));

        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.update_from_headers(&quota(Some("100"), Some("97")));
        let second = limiter.reset_at().unwrap();
        assert!(second > first);
        assert_eq!(second, Instant::now() + Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reactive_wait_never_blocks() {
        let limiter = RateLimiter::reactive(100, Duration::from_secs(15));
        limiter.update_from_headers(&quota(Some("100"), Some("0")));

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_wait_without_observation() {
        let limiter = RateLimiter::proactive(100, Duration::from_secs(900));

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_wait_spreads_remaining() {
        let limiter = RateLimiter::proactive(100, Duration::from_millis(100));
        limiter.update_from_headers(&quota(Some("100"), Some("2")));

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(60), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_wait_exhausted_sleeps_until_reset() {
        let limiter = RateLimiter::proactive(100, Duration::from_secs(900));
        limiter.update_from_headers(&quota(Some("100"), Some("0")));
        let reset_at = limiter.reset_at().unwrap();

        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert!(Instant::now() >= reset_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_wait_after_window_elapsed() {
        let limiter = RateLimiter::proactive(100, Duration::from_secs(1));
        limiter.update_from_headers(&quota(Some("100"), Some("1")));
        tokio::time::advance(Duration::from_secs(2)).await;

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proactive_wait_with_full_quota() {
        let limiter = RateLimiter::proactive(100, Duration::from_secs(60));
        limiter.update_from_headers(&quota(Some("100"), Some("50")));
        limiter.update_from_headers(&quota(Some("40"), Some("40")));

        let start = Instant::now();
        limiter.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_proactive_wait_is_interruptible() {
        let limiter = RateLimiter::proactive(100, Duration::from_secs(900));
        limiter.update_from_headers(&quota(Some("100"), Some("0")));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        let err = limiter.wait(&cancel).await.unwrap_err();
        assert!(err.is_interrupted());
        assert!(matches!(
            err,
            crate::Error::Interrupted {
                during: Suspension::RateLimitWait
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_during_wait_is_not_blocked() {
        let limiter = std::sync::Arc::new(RateLimiter::proactive(100, Duration::from_secs(10)));
        limiter.update_from_headers(&quota(Some("100"), Some("0")));

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.wait(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;

        limiter.update_from_headers(&quota(Some("100"), Some("10")));
        assert_eq!(limiter.remaining(), 10);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unrepresentable_window_leaves_reset_unset() {
        let limiter = RateLimiter::proactive(100, Duration::MAX);
        limiter.update_from_headers(&quota(Some("100"), Some("5")));

        assert_eq!(limiter.remaining(), 5);
        assert_eq!(limiter.reset_at(), None);
        limiter.wait(&CancellationToken::new()).await.unwrap();
    }
}

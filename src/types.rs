//! Common types used throughout the transport
//!
//! Shared enums and header-name constants used across multiple modules.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Response Headers
// ============================================================================

/// Current quota ceiling
pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Requests left in the current window
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Seconds, or an HTTP date, until a 429 may be retried
pub const RETRY_AFTER_HEADER: &str = "retry-after";

// ============================================================================
// Limiter Mode
// ============================================================================

/// How a rate limiter acts on the quota it observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterMode {
    /// Only record quota state, never block
    #[default]
    Reactive,
    /// Throttle before sending to spread the remaining allowance
    Proactive,
}

// ============================================================================
// Suspension Points
// ============================================================================

/// The places where a request may be suspended and interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    /// Proactive rate limiter throttling
    RateLimitWait,
    /// Sleep between retry attempts
    RetryBackoff,
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suspension::RateLimitWait => f.write_str("rate limit wait"),
            Suspension::RetryBackoff => f.write_str("retry backoff"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_mode_serde() {
        let mode: LimiterMode = serde_yaml::from_str("proactive").unwrap();
        assert_eq!(mode, LimiterMode::Proactive);
        assert_eq!(LimiterMode::default(), LimiterMode::Reactive);
        assert_eq!(
            serde_json::to_string(&LimiterMode::Reactive).unwrap(),
            "\"reactive\""
        );
    }
}

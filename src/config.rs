//! Configuration types for the transport
//!
//! This module contains the YAML-loadable client configuration. Every field
//! has a default, so an empty document yields a working config.

use crate::error::{Error, Result, ResultExt};
use crate::http::{CircuitBreakerConfig, RateLimiterConfig, RetryPolicy};
use crate::types::LimiterMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-Level Client Config
// ============================================================================

/// Complete client configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL for API requests
    #[serde(default)]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headers sent with every request (e.g. caller-supplied auth)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,

    /// Limiter attached to the general transport
    #[serde(default = "default_rate_limit")]
    pub rate_limit: RateLimitConfig,

    /// Limiter for the reports surface
    #[serde(default = "default_reports_rate_limit")]
    pub reports_rate_limit: RateLimitConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            headers: HashMap::new(),
            retry: RetryConfig::default(),
            circuit_breaker: BreakerConfig::default(),
            rate_limit: default_rate_limit(),
            reports_rate_limit: default_reports_rate_limit(),
        }
    }
}

impl ClientConfig {
    /// Parse a config from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check values the runtime types cannot represent
    pub fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.base_url {
            url::Url::parse(base_url)?;
        }
        if self.timeout_seconds == 0 {
            return Err(Error::invalid_value("timeout_seconds", "must be at least 1"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::invalid_value(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.cooldown_seconds > MAX_PERIOD_SECONDS {
            return Err(Error::invalid_value(
                "circuit_breaker.cooldown_seconds",
                format!("must be at most {MAX_PERIOD_SECONDS}"),
            ));
        }
        self.rate_limit.validate("rate_limit")?;
        self.reports_rate_limit.validate("reports_rate_limit")?;
        Ok(())
    }
}

/// Longest accepted quota window or breaker cooldown: one week
const MAX_PERIOD_SECONDS: u64 = 7 * 24 * 60 * 60;

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("resilient-transport/{}", env!("CARGO_PKG_VERSION"))
}

fn default_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 100,
        window_seconds: 15,
        mode: LimiterMode::Reactive,
    }
}

fn default_reports_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 100,
        window_seconds: 15 * 60,
        mode: LimiterMode::Proactive,
    }
}

// ============================================================================
// Retry Config
// ============================================================================

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Retries allowed for 429 responses
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Retries allowed for 5xx responses
    #[serde(default = "default_max_server_error_retries")]
    pub max_server_error_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_server_error_retries: default_max_server_error_retries(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            self.max_rate_limit_retries,
            self.max_server_error_retries,
        )
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_rate_limit_retries() -> u32 {
    10
}

fn default_max_server_error_retries() -> u32 {
    3
}

// ============================================================================
// Circuit Breaker Config
// ============================================================================

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive server failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds after the last failure before the breaker closes
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

impl BreakerConfig {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_seconds),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_seconds() -> u64 {
    30
}

// ============================================================================
// Rate Limit Config
// ============================================================================

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Quota ceiling assumed until the server reports one
    pub limit: i64,

    /// Quota window in seconds
    pub window_seconds: u64,

    /// Reactive (record only) or proactive (throttle)
    #[serde(default)]
    pub mode: LimiterMode,
}

impl RateLimitConfig {
    pub fn limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(
            self.limit,
            Duration::from_secs(self.window_seconds),
            self.mode,
        )
    }

    fn validate(&self, field: &str) -> Result<()> {
        if self.limit < 1 {
            return Err(Error::invalid_value(
                format!("{field}.limit"),
                "must be at least 1",
            ));
        }
        if self.window_seconds == 0 || self.window_seconds > MAX_PERIOD_SECONDS {
            return Err(Error::invalid_value(
                format!("{field}.window_seconds"),
                format!("must be between 1 and {MAX_PERIOD_SECONDS}"),
            ));
        }
        Ok(())
    }
}

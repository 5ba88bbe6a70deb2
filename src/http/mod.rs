//! HTTP transport module
//!
//! Decides for every outgoing call whether to send it, how fast, and how to
//! recover from transient failures.
//!
//! # Features
//!
//! - **Circuit Breaker**: Fail fast after consecutive server errors, self-heal after a cooldown
//! - **Rate Limiting**: Track `X-RateLimit-*` quota, optionally throttle before sending
//! - **Retries**: Separate budgets for 429 and 5xx, `Retry-After` aware, jittered backoff
//! - **Replayable Bodies**: Payloads buffered once and resent byte-identical

mod backoff;
mod body;
mod circuit_breaker;
mod client;
mod rate_limit;
mod transport;

pub use backoff::{retry_after, sleep, Jitter, NoJitter, RandomJitter, RetryPolicy};
pub use body::{BodyFactory, ReplayableBody, ReplayableRequest};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use client::{HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig};
pub use rate_limit::{RateLimitSnapshot, RateLimiter, RateLimiterConfig};
pub use transport::{HttpSend, RetryTransport};

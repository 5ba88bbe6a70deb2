#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

//! # Resilient Transport
//!
//! The HTTP transport layer beneath a REST API client. For every outgoing
//! call it decides whether to send it at all, how fast to send it relative
//! to the remote quota, and how to recover from transient failures.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resilient_transport::http::{HttpClient, HttpClientConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> resilient_transport::Result<()> {
//!     let config = HttpClientConfig::builder()
//!         .base_url("https://api.example.com/v2")
//!         .header("Authorization", "Bearer ...")
//!         .build();
//!     let client = HttpClient::with_config(config)?;
//!
//!     let cancel = CancellationToken::new();
//!     let response = client.get("/time_entries", &cancel).await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        HttpClient                          │
//! │   builds requests · reports limiter (proactive, 15 min)    │
//! └──────────────────────────────┬─────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┴─────────────────────────────┐
//! │                      RetryTransport                        │
//! │  breaker check → replay body → wait → send → classify      │
//! ├──────────────┬────────────────┬──────────────┬─────────────┤
//! │ Circuit      │ Rate Limiter   │ Backoff      │ Replayable  │
//! │ Breaker      │ (reactive, 15s)│ Retry-After  │ Body        │
//! │ 5 fails/30s  │ X-RateLimit-*  │ 2^n + jitter │             │
//! └──────────────┴────────────────┴──────────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the transport
pub mod error;

/// Common types and constants
pub mod types;

/// YAML client configuration
pub mod config;

/// Circuit breaker, rate limiting, retries, and the owning client
pub mod http;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use config::ClientConfig;
pub use http::{
    CircuitBreaker, HttpClient, HttpClientConfig, RateLimiter, RetryPolicy, RetryTransport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

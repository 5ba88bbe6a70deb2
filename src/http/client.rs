//! HTTP client owning the resilient transport
//!
//! Builds requests (base URL, default headers such as caller-supplied auth,
//! query, body, timeout) and hands them to the [`RetryTransport`]. A second,
//! proactive rate limiter meters the reports surface, which has its own and
//! much longer quota window.
//!
//! Responses are returned as received; mapping statuses to domain errors is
//! the caller's job.

use super::backoff::{Jitter, RetryPolicy};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::transport::RetryTransport;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Request, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for all requests
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Retry delays and budgets
    pub retry: RetryPolicy,
    /// Breaker shared by all requests
    pub circuit_breaker: CircuitBreakerConfig,
    /// Limiter attached to the transport
    pub rate_limit: RateLimiterConfig,
    /// Limiter for the reports surface
    pub reports_rate_limit: RateLimiterConfig,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimiterConfig::reactive(),
            reports_rate_limit: RateLimiterConfig::proactive(),
            default_headers: HashMap::new(),
            user_agent: format!("resilient-transport/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }

    /// Convert a validated file config into runtime settings
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base_url: config.base_url.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            retry: config.retry.policy(),
            circuit_breaker: config.circuit_breaker.breaker_config(),
            rate_limit: config.rate_limit.limiter_config(),
            reports_rate_limit: config.reports_rate_limit.limiter_config(),
            default_headers: config.headers.clone(),
            user_agent: config.user_agent.clone(),
        })
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set the base backoff delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    /// Set the circuit breaker threshold and cooldown
    pub fn circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.config.circuit_breaker = CircuitBreakerConfig {
            threshold,
            cooldown,
        };
        self
    }

    /// Set the transport's rate limiter
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Set the reports surface's rate limiter
    pub fn reports_rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.reports_rate_limit = config;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Raw request body
    pub body: Option<Bytes>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a raw body
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and content type
    pub fn json(self, body: &Value) -> Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(self
            .header(CONTENT_TYPE.as_str(), "application/json")
            .body(bytes))
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client with circuit breaking, rate limiting, and retries
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    transport: RetryTransport<Client>,
    reports_limiter: Arc<RateLimiter>,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let transport = RetryTransport::new(client.clone(), config.retry)
            .with_circuit_breaker(Arc::new(CircuitBreaker::new(config.circuit_breaker)))
            .with_rate_limiter(Arc::new(RateLimiter::new(&config.rate_limit)));
        let reports_limiter = Arc::new(RateLimiter::new(&config.reports_rate_limit));

        Ok(Self {
            client,
            config,
            transport,
            reports_limiter,
        })
    }

    /// Replace the transport's jitter source
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.transport = self.transport.with_jitter(jitter);
        self
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        self.transport.circuit_breaker()
    }

    /// Limiter fed by every response through the transport
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.transport.rate_limiter()
    }

    /// Proactive limiter for the reports surface
    pub fn reports_rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.reports_limiter
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Response> {
        self.request(Method::GET, url, RequestConfig::default(), cancel)
            .await
    }

    /// Make a POST request with a JSON body
    pub async fn post(&self, url: &str, body: &Value, cancel: &CancellationToken) -> Result<Response> {
        self.request(Method::POST, url, RequestConfig::new().json(body)?, cancel)
            .await
    }

    /// Make a generic request through the retry transport
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let request = self.build_request(method, url, config)?;
        self.transport.send(request, cancel).await
    }

    /// Make a request against the reports surface.
    ///
    /// The proactive reports limiter is waited on before every attempt and
    /// records the quota from every response, including retried 429s and 5xx.
    pub async fn request_reports(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let request = self.build_request(method, url, config)?;
        self.transport
            .send_through(request, &self.reports_limiter, cancel)
            .await
    }

    /// Build a request without sending it
    pub fn build_request(&self, method: Method, url: &str, config: RequestConfig) -> Result<Request> {
        let full_url = self.build_url(url)?;
        let mut headers = header_map(&self.config.default_headers)?;
        headers.extend(header_map(&config.headers)?);

        let mut req = self
            .client
            .request(method.clone(), full_url.clone())
            .headers(headers)
            .timeout(config.timeout.unwrap_or(self.config.timeout));

        if !config.query.is_empty() {
            req = req.query(&config.query);
        }

        if let Some(body) = config.body {
            req = req.body(body);
        }

        debug!(%method, url = %full_url, "Built request");
        Ok(req.build()?)
    }

    /// Build full URL from path
    fn build_url(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(path)?);
        }

        match &self.config.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = path.trim_start_matches('/');
                Ok(Url::parse(&format!("{base}/{path}"))?)
            }
            None => Ok(Url::parse(path)?),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("transport", &self.transport)
            .field("reports_limiter", &self.reports_limiter)
            .finish_non_exhaustive()
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_header(name, e.to_string()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name, e.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

//! Retrying transport
//!
//! Sends one logical request, retrying transient failures:
//! - 429 up to `max_rate_limit_retries` times, honoring `Retry-After`
//! - 5xx up to `max_server_error_retries` times, each counted by the breaker
//! - other 4xx and transport errors are returned as-is
//!
//! Attempts for one request are strictly sequential. Exhausted budgets return
//! the last response untouched for the caller to classify.

use super::backoff::{sleep, Jitter, RandomJitter, RetryPolicy};
use super::body::ReplayableRequest;
use super::circuit_breaker::CircuitBreaker;
use super::rate_limit::RateLimiter;
use crate::error::{Error, Result};
use crate::types::Suspension;
use async_trait::async_trait;
use reqwest::{Client, Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The base request sender wrapped by [`RetryTransport`]
#[async_trait]
pub trait HttpSend: Send + Sync {
    /// Send a single request with no retrying
    async fn send(&self, request: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl HttpSend for Client {
    async fn send(&self, request: Request) -> reqwest::Result<Response> {
        self.execute(request).await
    }
}

#[async_trait]
impl<T: HttpSend + ?Sized> HttpSend for Arc<T> {
    async fn send(&self, request: Request) -> reqwest::Result<Response> {
        (**self).send(request).await
    }
}

/// What to do with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    RateLimited,
    ServerError,
    ClientError,
}

impl Outcome {
    fn classify(status: StatusCode) -> Self {
        match status.as_u16() {
            0..=399 => Outcome::Success,
            429 => Outcome::RateLimited,
            500..=u16::MAX => Outcome::ServerError,
            _ => Outcome::ClientError,
        }
    }
}

/// Retry transport with a shared circuit breaker and optional rate limiter
pub struct RetryTransport<S = Client> {
    inner: S,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    limiter: Option<Arc<RateLimiter>>,
    jitter: Arc<dyn Jitter>,
}

impl<S: HttpSend> RetryTransport<S> {
    /// Wrap a sender with a fresh, default circuit breaker and no rate limiter
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            breaker: Arc::new(CircuitBreaker::default()),
            limiter: None,
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Share an existing circuit breaker
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Attach a rate limiter, waited on before and updated after every attempt
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Replace the jitter source
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Send a request, buffering its body so it can be replayed
    pub async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }

        let request = buffer(request, cancel).await?;
        self.run(&request, None, cancel).await
    }

    /// Send a request that also passes through `limiter`.
    ///
    /// `limiter` is waited on before every attempt and updated from every
    /// response, retried ones included, alongside the transport's own limiter.
    pub async fn send_through(
        &self,
        request: Request,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }

        let request = buffer(request, cancel).await?;
        self.run(&request, Some(limiter), cancel).await
    }

    /// Send a request that is already replayable
    pub async fn send_replayable(
        &self,
        request: &ReplayableRequest,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        if let Some(err) = self.fail_fast() {
            return Err(err);
        }
        self.run(request, None, cancel).await
    }

    fn fail_fast(&self) -> Option<Error> {
        if !self.breaker.is_open() {
            return None;
        }

        warn!("Circuit breaker open, rejecting request");
        Some(Error::CircuitOpen {
            failures: self.breaker.failures(),
            cooldown: self.breaker.cooldown(),
        })
    }

    async fn run(
        &self,
        request: &ReplayableRequest,
        extra: Option<&RateLimiter>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let limiters: Vec<&RateLimiter> =
            self.limiter.as_deref().into_iter().chain(extra).collect();
        let method = request.template().method().clone();
        let url = request.template().url().clone();
        let mut retries_429 = 0u32;
        let mut retries_5xx = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let attempt = request.attempt()?;

            for limiter in &limiters {
                limiter.wait(cancel).await?;
            }

            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                sent = self.inner.send(attempt) => sent?,
            };

            for limiter in &limiters {
                limiter.update_from_headers(response.headers());
            }

            let status = response.status();
            let delay = match Outcome::classify(status) {
                Outcome::Success => {
                    self.breaker.record_success();
                    debug!(%method, %url, status = status.as_u16(), "Request succeeded");
                    return Ok(response);
                }
                Outcome::ClientError => return Ok(response),
                Outcome::RateLimited => {
                    if retries_429 >= self.policy.max_rate_limit_retries {
                        return Ok(response);
                    }
                    let delay = self.policy.rate_limit_delay(
                        response.headers(),
                        retries_429,
                        self.jitter.as_ref(),
                    );
                    retries_429 += 1;
                    warn!(
                        %method,
                        %url,
                        attempt = retries_429,
                        max = self.policy.max_rate_limit_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited (429), retrying"
                    );
                    delay
                }
                Outcome::ServerError => {
                    self.breaker.record_failure();
                    if retries_5xx >= self.policy.max_server_error_retries {
                        return Ok(response);
                    }
                    let delay = self.policy.backoff(retries_5xx, self.jitter.as_ref());
                    retries_5xx += 1;
                    warn!(
                        %method,
                        %url,
                        status = status.as_u16(),
                        attempt = retries_5xx,
                        max = self.policy.max_server_error_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Server error, retrying"
                    );
                    delay
                }
            };

            drain(response, cancel).await?;
            sleep(delay, cancel, Suspension::RetryBackoff).await?;
        }
    }
}

/// Buffer the request body unless `cancel` fires first
async fn buffer(request: Request, cancel: &CancellationToken) -> Result<ReplayableRequest> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        buffered = ReplayableRequest::from_request(request) => buffered,
    }
}

/// Read a discarded response to its end so the connection can be reused.
///
/// A stalled body is abandoned as soon as `cancel` fires.
async fn drain(response: Response, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        body = response.bytes() => {
            if let Err(e) = body {
                debug!(error = %e, "Failed to drain response body");
            }
            Ok(())
        }
    }
}

impl<S> fmt::Debug for RetryTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTransport")
            .field("policy", &self.policy)
            .field("breaker", &self.breaker)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

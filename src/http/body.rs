//! Replayable request bodies
//!
//! A `reqwest::Request` with a streaming body can be sent exactly once. Before
//! a request enters the retry loop its payload is read into memory, after which
//! every attempt gets a fresh, independent `Body` over the same bytes.

use crate::error::{Error, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use reqwest::{Body, Request};
use std::fmt;
use std::sync::Arc;

/// Produces a fresh body over the same buffered bytes on every call
pub type BodyFactory = Arc<dyn Fn() -> Body + Send + Sync>;

/// A payload buffered once so it can be resent unchanged
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayableBody {
    bytes: Bytes,
}

impl ReplayableBody {
    /// Wrap bytes that are already in memory
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Read a body to its end, consuming the original stream
    pub async fn buffer(body: Body) -> Result<Self> {
        if let Some(bytes) = body.as_bytes() {
            return Ok(Self::new(Bytes::copy_from_slice(bytes)));
        }

        let collected = body.collect().await.map_err(Error::BodyBuffer)?;
        Ok(Self::new(collected.to_bytes()))
    }

    /// A brand-new body over the buffered bytes
    pub fn replay(&self) -> Body {
        Body::from(self.bytes.clone())
    }

    /// A factory closure yielding a new body on each call
    pub fn factory(&self) -> BodyFactory {
        let bytes = self.bytes.clone();
        Arc::new(move || Body::from(bytes.clone()))
    }

    /// The buffered payload
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// An HTTP request paired with a body factory
///
/// The request is kept as a body-less template. Each call to [`attempt`]
/// clones the template and installs a fresh body from the factory.
///
/// [`attempt`]: ReplayableRequest::attempt
pub struct ReplayableRequest {
    template: Request,
    factory: Option<BodyFactory>,
}

impl ReplayableRequest {
    /// Make a request replayable, buffering its body if it has one.
    ///
    /// A request without a body is kept as-is; no buffering happens.
    pub async fn from_request(mut request: Request) -> Result<Self> {
        let factory = match request.body_mut().take() {
            Some(body) => Some(ReplayableBody::buffer(body).await?.factory()),
            None => None,
        };

        Ok(Self {
            template: request,
            factory,
        })
    }

    /// Pair a body-less request with an existing factory
    pub fn with_factory(mut request: Request, factory: BodyFactory) -> Self {
        request.body_mut().take();
        Self {
            template: request,
            factory: Some(factory),
        }
    }

    /// Build the next attempt with a fresh body
    pub fn attempt(&self) -> Result<Request> {
        let mut request = self.template.try_clone().ok_or(Error::NotReplayable)?;
        if let Some(factory) = &self.factory {
            *request.body_mut() = Some(factory());
        }
        Ok(request)
    }

    pub fn has_body(&self) -> bool {
        self.factory.is_some()
    }

    /// The body-less request all attempts are cloned from
    pub fn template(&self) -> &Request {
        &self.template
    }
}

impl fmt::Debug for ReplayableRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayableRequest")
            .field("method", self.template.method())
            .field("url", &self.template.url().as_str())
            .field("has_body", &self.has_body())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use url::Url;

    fn request_with(body: Option<Body>) -> Request {
        let mut request = Request::new(
            Method::POST,
            Url::parse("https://api.example.com/v2/time_entries").unwrap(),
        );
        *request.body_mut() = body;
        request
    }

    async fn read(body: Body) -> Bytes {
        body.collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_buffer_in_memory_body() {
        let body = ReplayableBody::buffer(Body::from("hours=2.5")).await.unwrap();
        assert_eq!(body.bytes().as_ref(), b"hours=2.5");
        assert_eq!(body.len(), 9);
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn test_buffer_streaming_body() {
        let chunks: Vec<std::result::Result<&'static str, std::io::Error>> =
            vec![Ok("{\"project_id\":"), Ok("42,"), Ok("\"hours\":1}")];
        let stream = Body::wrap_stream(futures::stream::iter(chunks));

        let body = ReplayableBody::buffer(stream).await.unwrap();
        assert_eq!(
            body.bytes().as_ref(),
            b"{\"project_id\":42,\"hours\":1}".as_slice()
        );
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let original = Bytes::from_static(b"{\"notes\":\"same every time\"}");
        let body = ReplayableBody::new(original.clone());
        let factory = body.factory();

        for _ in 0..5 {
            assert_eq!(read(factory()).await, original);
            assert_eq!(read(body.replay()).await, original);
        }
    }

    #[tokio::test]
    async fn test_request_attempts_carry_identical_bodies() {
        let request = request_with(Some(Body::from("client_id=7")));
        let replayable = ReplayableRequest::from_request(request).await.unwrap();
        assert!(replayable.has_body());
        assert!(replayable.template().body().is_none());

        for _ in 0..3 {
            let attempt = replayable.attempt().unwrap();
            assert_eq!(attempt.method(), Method::POST);
            assert_eq!(attempt.body().unwrap().as_bytes(), Some(&b"client_id=7"[..]));
        }
    }

    #[tokio::test]
    async fn test_request_without_body_is_noop() {
        let replayable = ReplayableRequest::from_request(request_with(None))
            .await
            .unwrap();
        assert!(!replayable.has_body());
        assert!(replayable.attempt().unwrap().body().is_none());
    }

    #[tokio::test]
    async fn test_existing_factory_is_reused() {
        let factory = ReplayableBody::new("prebuilt").factory();
        let replayable = ReplayableRequest::with_factory(request_with(None), factory);
        let attempt = replayable.attempt().unwrap();
        assert_eq!(attempt.body().unwrap().as_bytes(), Some(&b"prebuilt"[..]));
    }
}

//! Transport layer: one `HttpRequest` in, one completion out.
//!
//! # Design
//! `HttpTransport` is the seam between the protocol logic and the network.
//! A call resolves exactly once: `Ok` when the server answered with any
//! status, `Err` when no HTTP response was received at all. Status codes are
//! never turned into errors here; conversations decide what a status means.
//!
//! There is no retry and no default timeout. Authentication challenges are
//! never answered: the service authenticates with a static API key header, so
//! a 401 simply comes back as a response.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::warn;

use crate::http::{HttpBody, HttpMethod, HttpRequest, HttpResponse};

/// Failure to obtain any HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established (DNS, refused, TLS handshake).
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The response body could not be read to the end.
    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = error_chain(&err);
        if err.is_timeout() {
            TransportError::Timeout(message)
        } else if err.is_connect() {
            TransportError::Connect(message)
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(message)
        } else {
            TransportError::Request(message)
        }
    }
}

/// reqwest's top-level message hides the interesting part in its sources.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Executes a single HTTP request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Settings for `ReqwestTransport`.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Accept certificates that fail validation, e.g. self-signed lab CAs.
    pub accept_invalid_certs: bool,

    /// Per-request timeout. `None` leaves the request unbounded.
    pub request_timeout: Option<Duration>,
}

/// `HttpTransport` backed by a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if config.accept_invalid_certs {
            warn!("TLS certificate validation is disabled for this endpoint");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| TransportError::Request(error_chain(&e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method() {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = request.content_type() {
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .body(request.body().data().clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let data = response.bytes().await?;

        Ok(HttpResponse::new(status, HttpBody::new(content_type, data)))
    }
}

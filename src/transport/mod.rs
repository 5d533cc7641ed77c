//! HTTP transport module
//!
//! A [`Transport`] performs exactly one HTTP exchange for the upload engine.
//! The engine never talks to `reqwest` directly, so tests can swap in a
//! scripted transport and the blocking and async drivers share one core.
//!
//! # Example
//!
//! ```no_run
//! use tus_uploadr::transport::{HttpRequest, HttpTransport, HttpTransportConfig, Transport};
//! use reqwest::Method;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(HttpTransportConfig::default())?;
//! let url = "http://localhost:1080/files/abc".parse()?;
//! let response = transport.execute(HttpRequest::new(Method::HEAD, url)).await?;
//! println!("status: {}", response.status);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use std::time::Duration;
use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

/// One outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status, headers and raw body of one response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A single HTTP exchange
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the server's response.
    ///
    /// Any status code is a successful exchange; only connection-level
    /// failures are errors.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request).await
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Default)]
pub struct HttpTransportConfig {
    /// Whole-request timeout
    pub timeout: Option<Duration>,
    /// TCP connect timeout
    pub connect_timeout: Option<Duration>,
}

/// [`Transport`] backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("tus-uploadr/", env!("CARGO_PKG_VERSION")));

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        let http_client = builder
            .build()
            .map_err(|e| TransportError::ConfigError(e.to_string()))?;

        Ok(Self { http_client })
    }

    /// Wrap an existing client
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(
        name = "tus.http",
        skip(self, request),
        fields(
            http.method = %request.method,
            http.url = %request.url,
            http.request_bytes = request.body.as_ref().map_or(0, |b| b.len()),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http_client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?;

        tracing::Span::current().record("http.status_code", status);
        tracing::debug!(status = status, bytes = body.len(), "HTTP exchange completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else {
        TransportError::RequestError(error.to_string())
    }
}

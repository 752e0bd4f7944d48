//! Transport seam between the API client and the wire.
//!
//! Production traffic goes through [`HttpTransport`] (reqwest); tests
//! substitute scripted implementations of [`Transport`].

use crate::{ApiError, ApiResult};
use async_trait::async_trait;
use reqwest::header;
use reqwest::Method;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A single request as seen by the transport layer.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Bearer token for the Authorization header, when the call is
    /// authenticated. Handshake step tokens travel in the body instead.
    pub bearer: Option<String>,
}

impl TransportRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body,
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, bearer: Option<String>) -> Self {
        self.bearer = bearer;
        self
    }
}

/// Raw response: status plus the full body text.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for dispatching requests to the backend.
///
/// Implementations must not retry; the bounded retry policy lives in the
/// client on top of this seam.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> ApiResult<RawResponse>;
}

/// reqwest-backed transport with a fixed request timeout.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport against the given base URL.
    ///
    /// The client carries a cookie store for backends that pair the bearer
    /// token with a cookie-based session, and a hard timeout ceiling so no
    /// call outlives `timeout`.
    pub fn new(base_url: Url, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> ApiResult<RawResponse> {
        let url = self.base_url.join(&request.path)?;

        debug!(method = %request.method, url = %url, "Dispatching request");

        let mut builder = self
            .http
            .request(request.method, url)
            .header(header::ACCEPT, "application/json");

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }

        let response = builder.send().await.map_err(ApiError::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(ApiError::from_reqwest)?;

        Ok(RawResponse { status, body })
    }
}

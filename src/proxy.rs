//! Same-origin forwarding of `/api/backend/<path>` to the configured API.
//!
//! Only `content-type` and `authorization` travel upstream. The response
//! carries the upstream status, body and `content-type`, plus
//! `cache-control: no-store`. Transport failures become a 502 naming the
//! reason and the attempted URL; idempotent methods get a bounded retry.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{BackendConfig, Environment};
use crate::error::AppError;
use crate::{BACKEND_PROXY_PREFIX, DEV_DEFAULT_API_URL};

/// Pick the upstream base URL: `API_URL`, then `NEXT_PUBLIC_API_URL`, then
/// the local default when running in development.
pub fn resolve_base_url(config: &BackendConfig, environment: Environment) -> Option<String> {
    if let Some(url) = &config.api_url {
        return Some(url.clone());
    }
    if let Some(url) = &config.public_api_url {
        return Some(url.clone());
    }
    if environment == Environment::Development {
        warn!("No API base URL configured, using development default {DEV_DEFAULT_API_URL}");
        return Some(DEV_DEFAULT_API_URL.to_string());
    }
    None
}

/// A dot segment, including the percent-encoded forms the URL parser also
/// resolves.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Join `path` onto `base` with exactly one separating slash and attach
/// `query`. The query keeps its parameters, order and existing escapes, but
/// goes through WHATWG URL serialization, so bytes such as `'`, `"` or a
/// space are percent-encoded on the way out.
pub fn build_upstream_url(base: &str, path: &str, query: Option<&str>) -> Result<Url, AppError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(bad) = segments
        .iter()
        .find(|s| is_dot_segment(s) || s.contains('\\'))
    {
        return Err(AppError::InvalidPath(format!("segment {bad:?} is not allowed")));
    }

    let joined = format!("{}/{}", base.trim_end_matches('/'), segments.join("/"));
    let mut url = Url::parse(&joined).map_err(|e| AppError::InvalidPath(e.to_string()))?;
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

/// Attempt budget for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts for GET/HEAD. Other methods are always attempted once.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if is_idempotent(method) {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Backoff after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exp)
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

/// Upstream statuses worth another attempt for idempotent requests.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Everything the proxy forwards from one inbound request.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Path below the proxy prefix, still percent-encoded.
    pub path: String,
    pub query: Option<String>,
    pub content_type: Option<HeaderValue>,
    pub authorization: Option<HeaderValue>,
    pub body: Bytes,
}

impl ForwardRequest {
    /// Apply the header policy: keep `content-type` and `authorization`,
    /// drop everything else. GET/HEAD bodies are discarded.
    pub fn from_parts(method: Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Self {
        let path = uri
            .path()
            .strip_prefix(BACKEND_PROXY_PREFIX)
            .unwrap_or_else(|| uri.path())
            .to_string();
        let body = if is_idempotent(&method) {
            Bytes::new()
        } else {
            body
        };

        Self {
            method,
            path,
            query: uri.query().map(str::to_string),
            content_type: headers.get(header::CONTENT_TYPE).cloned(),
            authorization: headers.get(header::AUTHORIZATION).cloned(),
            body,
        }
    }
}

/// Upstream reply relayed back to the caller.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        headers.remove(header::CONTENT_TYPE);
        if let Some(content_type) = self.content_type {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

/// Render a transport error with its cause chain, e.g.
/// `error sending request: connection refused`.
fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "request timed out".to_string();
    }
    let mut parts = vec![err.to_string()];
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last() != Some(&text) {
            parts.push(text);
        }
        source = StdError::source(cause);
    }
    parts.join(": ")
}

/// Forwarding client for the backend API.
///
/// Cheap to clone; the underlying reqwest client pools connections.
#[derive(Debug, Clone)]
pub struct BackendProxy {
    client: Client,
    base_url: Option<String>,
    retry: RetryPolicy,
}

impl BackendProxy {
    pub fn new(config: &BackendConfig, environment: Environment) -> Result<Self> {
        let base_url = resolve_base_url(config, environment);
        if let Some(base) = &base_url {
            Url::parse(base).with_context(|| format!("invalid API base URL {base:?}"))?;
            info!("Backend proxy forwarding to {base}");
        } else {
            warn!("No API base URL configured, backend proxy will answer 500");
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .context("failed to build backend HTTP client")?;

        Ok(Self {
            client,
            base_url,
            retry: RetryPolicy {
                max_attempts: config.max_attempts,
                base_backoff: config.retry_backoff(),
            },
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Forward one request. Never fails with anything but a mapped `AppError`.
    pub async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, AppError> {
        let base = self.base_url.as_deref().ok_or(AppError::MissingApiBaseUrl)?;
        let url = build_upstream_url(base, &request.path, request.query.as_deref())?;
        let attempts = self.retry.attempts_for(&request.method);
        let started = Instant::now();

        debug!(method = %request.method, upstream = %url, "Forwarding to backend");

        let mut attempt = 1;
        loop {
            match self.send_once(&request, &url).await {
                Ok(resp) if attempt < attempts && is_retryable_status(resp.status) => {
                    warn!(
                        method = %request.method,
                        upstream = %url,
                        status = %resp.status,
                        attempt,
                        "Backend returned retryable status"
                    );
                }
                Ok(resp) => {
                    info!(
                        method = %request.method,
                        upstream = %url,
                        status = %resp.status,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Backend responded"
                    );
                    return Ok(resp);
                }
                Err(e) => {
                    let reason = describe_transport_error(&e);
                    if attempt >= attempts {
                        warn!(
                            method = %request.method,
                            upstream = %url,
                            attempt,
                            "Backend request failed: {reason}"
                        );
                        return Err(AppError::Upstream {
                            reason,
                            upstream: url.to_string(),
                        });
                    }
                    warn!(
                        method = %request.method,
                        upstream = %url,
                        attempt,
                        "Transient backend failure, retrying: {reason}"
                    );
                }
            }

            tokio::time::sleep(self.retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        request: &ForwardRequest,
        url: &Url,
    ) -> Result<UpstreamResponse, reqwest::Error> {
        let mut builder = self.client.request(request.method.clone(), url.clone());
        if let Some(content_type) = &request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type.clone());
        }
        if let Some(authorization) = &request.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization.clone());
        }
        if !is_idempotent(&request.method) {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
        let body = resp.bytes().await?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

//! Typed client for the gateway's own routes.
//!
//! Calls go through `/api/backend/*` exactly like the browser does, so the
//! error mapping here mirrors what users see: a string payload or its
//! `detail` field becomes the message.

use anyhow::{Context, Result};
use reqwest::{Client, Method, header};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::BACKEND_PROXY_PREFIX;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// Message for a failed response: the payload itself when it is a
/// non-empty string, else a non-empty `detail` string.
pub fn read_error_message(payload: &Value) -> Option<String> {
    match payload {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("detail")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn has_header(headers: &[(&str, &str)], name: &str) -> bool {
    headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl ApiClient {
    /// `base_url` is the gateway origin, e.g. `http://localhost:3000`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build API HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    /// Attach `Authorization: Bearer <token>` unless a call supplies its own.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into()).filter(|t: &String| !t.is_empty());
        self
    }

    pub fn backend_url(&self, path: &str) -> String {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        format!("{}{BACKEND_PROXY_PREFIX}{path}", self.base_url)
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.request(Method::POST, path, Some(body), &[]).await
    }

    /// Call a backend route through the proxy.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let url = self.backend_url(path);
        self.send(method, &url, body, headers).await
    }

    /// `POST /api/waitlist/unlock`.
    pub async fn unlock_waitlist(&self, password: &str) -> Result<Value, ApiError> {
        let url = format!("{}/api/waitlist/unlock", self.base_url);
        self.send(Method::POST, &url, Some(&json!({ "password": password })), &[])
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let mut builder = self
            .client
            .request(method.clone(), url)
            .header(header::CACHE_CONTROL, "no-store");
        if !has_header(headers, header::CONTENT_TYPE.as_str()) {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        for (key, value) in headers {
            builder = builder.header(*key, *value);
        }
        if !has_header(headers, header::AUTHORIZATION.as_str())
            && let Some(token) = &self.access_token
        {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        debug!(%method, url, "Calling gateway");
        let resp = builder.send().await?;
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

        let text = resp.text().await.unwrap_or_default();
        let payload = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::Null)
        } else {
            Value::String(text)
        };

        if !status.is_success() {
            let message = read_error_message(&payload)
                .unwrap_or_else(|| format!("Request failed: {status}"));
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
                details: payload,
            });
        }

        Ok(payload)
    }
}

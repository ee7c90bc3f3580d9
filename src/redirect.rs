//! Redirect target sanitisation.
//!
//! Every redirect issued by the auth routes goes through [`RedirectPolicy`],
//! which only ever produces URLs on an allow-listed origin.

use anyhow::{Context, Result};
use axum::http::{HeaderMap, header};
use url::Url;

use crate::config::{Environment, RedirectConfig};

/// Accept only same-site absolute paths (`/x`, never `//host` or `x`).
fn safe_relative_path(path: Option<&str>) -> Option<&str> {
    let path = path?;
    if !path.starts_with('/') || path.starts_with("//") || path.starts_with("/\\") {
        return None;
    }
    Some(path)
}

pub fn normalize_next_path<'a>(path: Option<&'a str>, fallback: &'a str) -> &'a str {
    safe_relative_path(path).unwrap_or(fallback)
}

/// Origin the request was made against, as seen through any proxy in front.
pub fn request_origin(headers: &HeaderMap) -> Option<String> {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let host = header_str("x-forwarded-host").or_else(|| header_str(header::HOST.as_str()))?;
    let proto = header_str("x-forwarded-proto").unwrap_or("http");
    Some(format!("{proto}://{host}"))
}

#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    allowed_origins: Vec<String>,
    default_origin: Url,
}

impl RedirectPolicy {
    pub fn new(config: &RedirectConfig, environment: Environment) -> Result<Self> {
        let default_origin = if environment.is_production() {
            &config.primary_origin
        } else {
            &config.dev_origin
        };
        let default_origin = Url::parse(default_origin)
            .with_context(|| format!("invalid default redirect origin {default_origin:?}"))?;

        Ok(Self {
            allowed_origins: config
                .allowed_origins
                .iter()
                .filter_map(|o| origin_of(o))
                .collect(),
            default_origin,
        })
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }

    fn trusted_origin(&self, request_origin: Option<&str>) -> Url {
        request_origin
            .and_then(|raw| Url::parse(raw).ok())
            .filter(|url| self.is_allowed(&url.origin().ascii_serialization()))
            .unwrap_or_else(|| self.default_origin.clone())
    }

    /// Resolve `redirect_to` to a URL on an allowed origin.
    ///
    /// Relative paths land on the request origin (if allowed) or the
    /// environment default; absolute URLs survive only when their origin is
    /// allowed; everything else yields `fallback_path`.
    pub fn resolve(
        &self,
        request_origin: Option<&str>,
        redirect_to: Option<&str>,
        fallback_path: &str,
    ) -> Url {
        let base = self.trusted_origin(request_origin);
        let fallback = base
            .join(normalize_next_path(Some(fallback_path), "/markets"))
            .unwrap_or_else(|_| base.clone());

        if let Some(path) = safe_relative_path(redirect_to) {
            return base.join(path).unwrap_or(fallback);
        }

        if let Some(raw) = redirect_to
            && let Ok(absolute) = Url::parse(raw)
            && self.is_allowed(&absolute.origin().ascii_serialization())
        {
            return absolute;
        }

        fallback
    }
}

/// `scheme://host[:port]` of a URL string, if it parses.
fn origin_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

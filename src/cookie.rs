//! Minimal cookie helpers: read one value out of `Cookie` request headers and
//! render `Set-Cookie` response headers.

use std::fmt;

use axum::http::{HeaderMap, HeaderValue, header, header::InvalidHeaderValue};

/// Find the value of cookie `name` across all inbound `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// A `Set-Cookie` header under construction. Always `Path=/; HttpOnly;
/// SameSite=Lax`; without `max_age` it is a session cookie.
#[derive(Debug, Clone)]
pub struct SetCookie {
    name: String,
    value: String,
    max_age: Option<u64>,
    secure: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            secure: false,
        }
    }

    pub fn max_age(mut self, secs: u64) -> Self {
        self.max_age = Some(secs);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn to_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_str(&self.to_string())
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path=/", self.name, self.value)?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        f.write_str("; HttpOnly; SameSite=Lax")?;
        if self.secure {
            f.write_str("; Secure")?;
        }
        Ok(())
    }
}

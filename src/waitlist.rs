//! Waitlist access gate.
//!
//! A user unlocks the gate by submitting the shared access code. On success
//! the server issues a cookie bound to that user:
//!
//! ```text
//! {user_id}:{issued_at_unix_secs}.{hex(hmac_sha256(cookie_secret, payload))}
//! ```
//!
//! The cookie's `Max-Age` is the only expiry; `issued_at` is informational.
//! The HMAC key is always the dedicated cookie secret, never the access
//! code, so rotating the code does not invalidate issued cookies.

use std::fmt;

use axum::http::HeaderValue;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use crate::config::{Environment, WaitlistConfig};
use crate::cookie::SetCookie;
use crate::{WAITLIST_COOKIE_MAX_AGE_SECS, WAITLIST_COOKIE_NAME};

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("waitlist cookie secret is not configured")]
    MissingSecret,

    #[error("cookie value is not a valid header: {0}")]
    InvalidHeader(String),
}

/// Where a given request stands relative to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Unconfigured,
    NoCookie,
    CookieInvalid,
    CookieValid,
}

impl GateStatus {
    pub fn is_granted(self) -> bool {
        self == Self::CookieValid
    }
}

#[derive(Clone)]
pub struct WaitlistGate {
    access_code: Option<String>,
    cookie_secret: Option<String>,
    secure_cookie: bool,
}

impl fmt::Debug for WaitlistGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitlistGate")
            .field("access_code", &self.access_code.as_ref().map(|_| "<redacted>"))
            .field("cookie_secret", &self.cookie_secret.as_ref().map(|_| "<redacted>"))
            .field("secure_cookie", &self.secure_cookie)
            .finish()
    }
}

/// Length check, then constant-time comparison of equal-length inputs.
fn safe_equal(left: &str, right: &str) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.as_bytes().ct_eq(right.as_bytes()).into()
}

impl WaitlistGate {
    pub fn new(
        access_code: Option<String>,
        cookie_secret: Option<String>,
        secure_cookie: bool,
    ) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            access_code: clean(access_code),
            cookie_secret: clean(cookie_secret),
            secure_cookie,
        }
    }

    pub fn from_config(config: &WaitlistConfig, environment: Environment) -> Self {
        Self::new(
            config.access_code.clone(),
            config.cookie_secret.clone(),
            environment.is_production(),
        )
    }

    /// True only when both the access code and a distinct signing secret are set.
    pub fn is_configured(&self) -> bool {
        self.access_code.is_some() && self.cookie_secret.is_some()
    }

    /// Fails closed when no code is configured.
    pub fn is_correct_access_code(&self, candidate: &str) -> bool {
        match &self.access_code {
            Some(expected) => safe_equal(candidate.trim(), expected),
            None => false,
        }
    }

    fn sign(&self, payload: &str) -> Option<String> {
        let secret = self.cookie_secret.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build a cookie value for `user_id`, stamped with the current time.
    pub fn issue_cookie(&self, user_id: &str) -> Result<String, GateError> {
        self.issue_cookie_at(user_id, chrono::Utc::now().timestamp())
    }

    pub fn issue_cookie_at(&self, user_id: &str, issued_at: i64) -> Result<String, GateError> {
        let payload = format!("{user_id}:{issued_at}");
        let signature = self.sign(&payload).ok_or(GateError::MissingSecret)?;
        Ok(format!("{payload}.{signature}"))
    }

    /// Check that `raw` was issued by this server for `expected_user_id`.
    pub fn verify_cookie(&self, raw: &str, expected_user_id: &str) -> bool {
        // The signature is hex and the timestamp is digits, so both splits
        // take the rightmost separator and the user id may contain either.
        let Some((payload, signature)) = raw.rsplit_once('.') else {
            return false;
        };
        let Some((payload_user_id, issued_at)) = payload.rsplit_once(':') else {
            return false;
        };
        if issued_at.parse::<i64>().is_err() {
            return false;
        }

        if payload_user_id.is_empty() || payload_user_id != expected_user_id {
            debug!("waitlist cookie bound to a different user");
            return false;
        }

        match self.sign(payload) {
            Some(expected) => safe_equal(signature, &expected),
            None => false,
        }
    }

    pub fn status(&self, cookie: Option<&str>, user_id: &str) -> GateStatus {
        if !self.is_configured() {
            return GateStatus::Unconfigured;
        }
        match cookie {
            None => GateStatus::NoCookie,
            Some(raw) if self.verify_cookie(raw, user_id) => GateStatus::CookieValid,
            Some(_) => GateStatus::CookieInvalid,
        }
    }

    /// `Set-Cookie` header carrying a freshly issued access cookie.
    pub fn set_cookie_header(&self, value: &str) -> Result<HeaderValue, GateError> {
        SetCookie::new(WAITLIST_COOKIE_NAME, value)
            .max_age(WAITLIST_COOKIE_MAX_AGE_SECS)
            .secure(self.secure_cookie)
            .to_header_value()
            .map_err(|e| GateError::InvalidHeader(e.to_string()))
    }
}

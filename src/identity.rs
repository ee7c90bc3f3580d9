//! Identity provider boundary.
//!
//! Session handling belongs to a Supabase-compatible auth service; this
//! module only calls its REST endpoints. Handlers receive the provider as
//! an injected `Arc<dyn IdentityProvider>` built once at startup.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Environment, IdentityConfig};
use crate::cookie::{SetCookie, read_cookie};

/// Access-token cookie lifetime when the provider omits `expires_in`.
const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 60 * 60;

/// Refresh-token cookie lifetime (400 days, the browser cap).
const REFRESH_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 400;

/// The authenticated user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens returned by OTP verification or a PKCE code exchange.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish()
    }
}

/// Email link types the provider can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailOtpType {
    Signup,
    Invite,
    Magiclink,
    Recovery,
    EmailChange,
    Email,
}

impl EmailOtpType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "signup" => Some(Self::Signup),
            "invite" => Some(Self::Invite),
            "magiclink" => Some(Self::Magiclink),
            "recovery" => Some(Self::Recovery),
            "email_change" => Some(Self::EmailChange),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Invite => "invite",
            Self::Magiclink => "magiclink",
            Self::Recovery => "recovery",
            Self::EmailChange => "email_change",
            Self::Email => "email",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The provider rejected the request; the message is shown to the user.
    #[error("{0}")]
    Rejected(String),

    #[error("identity provider unreachable: {0}")]
    Transport(String),
}

impl AuthError {
    pub fn message(&self) -> &str {
        match self {
            AuthError::Rejected(msg) | AuthError::Transport(msg) => msg,
        }
    }

    /// The PKCE verifier was missing or did not match; happens when a link
    /// is opened on a different device than the one that requested it.
    pub fn is_code_verifier_error(&self) -> bool {
        let normalized = self.message().to_lowercase();
        normalized.contains("code verifier")
            || normalized.contains("both auth code and code verifier should be non-empty")
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve an access token to its user. `Ok(None)` means the token is
    /// missing, expired or revoked.
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>>;

    async fn verify_otp(
        &self,
        kind: EmailOtpType,
        token_hash: &str,
    ) -> std::result::Result<AuthSession, AuthError>;

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> std::result::Result<AuthSession, AuthError>;
}

/// Bearer token from `Authorization`, else the access-token cookie.
pub fn access_token_from_request(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    bearer.or_else(|| read_cookie(headers, cookie_name))
}

/// Names and attributes of the cookies that carry the provider session.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    pub access_token: String,
    pub refresh_token: String,
    pub code_verifier: String,
    pub secure: bool,
}

impl SessionCookies {
    pub fn from_config(config: &IdentityConfig, environment: Environment) -> Self {
        Self {
            access_token: config.access_token_cookie.clone(),
            refresh_token: config.refresh_token_cookie.clone(),
            code_verifier: config.code_verifier_cookie.clone(),
            secure: environment.is_production(),
        }
    }

    pub fn access_token(&self, headers: &HeaderMap) -> Option<String> {
        access_token_from_request(headers, &self.access_token)
    }

    pub fn code_verifier(&self, headers: &HeaderMap) -> Option<String> {
        read_cookie(headers, &self.code_verifier)
    }

    /// `Set-Cookie` values storing `session` and clearing the spent PKCE
    /// verifier. Tokens that are not valid header text are skipped.
    pub fn session_headers(&self, session: &AuthSession) -> Vec<HeaderValue> {
        let cookies = [
            SetCookie::new(&self.access_token, &session.access_token)
                .max_age(session.expires_in.unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS)),
            SetCookie::new(&self.refresh_token, &session.refresh_token)
                .max_age(REFRESH_COOKIE_MAX_AGE_SECS),
            SetCookie::new(&self.code_verifier, "").max_age(0),
        ];

        cookies
            .into_iter()
            .map(|c| c.secure(self.secure))
            .filter_map(|c| match c.to_header_value() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Dropping session cookie that is not a valid header: {e}");
                    None
                }
            })
            .collect()
    }
}

/// Pull a human-readable message out of a provider error body.
fn provider_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| v.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("identity provider returned {status}"))
}

/// Supabase Auth (GoTrue) REST client.
#[derive(Clone)]
pub struct SupabaseIdentity {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl fmt::Debug for SupabaseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseIdentity")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SupabaseIdentity {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build identity HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL) is not set")?;
        let key = config
            .anon_key
            .as_deref()
            .context("SUPABASE_ANON_KEY (or NEXT_PUBLIC_SUPABASE_ANON_KEY) is not set")?;
        Self::new(url, key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    async fn post_for_session(
        &self,
        url: &str,
        body: Value,
    ) -> std::result::Result<AuthSession, AuthError> {
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            let msg = provider_error_message(status, &text);
            debug!(%status, "Identity provider rejected request: {msg}");
            return Err(AuthError::Rejected(msg));
        }

        serde_json::from_str(&text)
            .map_err(|e| AuthError::Transport(format!("unexpected session payload: {e}")))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentity {
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        let resp = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .context("identity provider request failed")?;

        match resp.status() {
            s if s.is_success() => {
                let user = resp
                    .json::<AuthUser>()
                    .await
                    .context("failed to parse identity provider user")?;
                Ok(Some(user))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            s => {
                warn!(status = %s, "Identity provider returned unexpected status for user lookup");
                anyhow::bail!("identity provider returned {s}")
            }
        }
    }

    async fn verify_otp(
        &self,
        kind: EmailOtpType,
        token_hash: &str,
    ) -> std::result::Result<AuthSession, AuthError> {
        self.post_for_session(
            &self.endpoint("verify"),
            json!({ "type": kind.as_str(), "token_hash": token_hash }),
        )
        .await
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> std::result::Result<AuthSession, AuthError> {
        self.post_for_session(
            &self.endpoint("token?grant_type=pkce"),
            json!({ "auth_code": code, "code_verifier": code_verifier.unwrap_or_default() }),
        )
        .await
    }
}

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{DEV_APP_ORIGIN, PRIMARY_APP_ORIGIN};

/// Default config file path.
pub const CONFIG_PATH: &str = "gateway.toml";

/// Deployment environment.
///
/// Anything other than an explicit `development` (or `dev`) is production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Top-level application config deserialized from `gateway.toml`, with
/// environment overrides applied on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub waitlist: WaitlistConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub redirects: RedirectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Upstream API settings for the backend proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Server-only upstream base URL (`API_URL`). Preferred.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Public fallback (`NEXT_PUBLIC_API_URL`).
    #[serde(default)]
    pub public_api_url: Option<String>,
    /// Whole-request deadline in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// TCP + TLS handshake deadline in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Attempts for idempotent requests (GET/HEAD). 1 disables retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff between attempts in milliseconds (doubles each attempt).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Largest inbound body the proxy accepts.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            public_api_url: None,
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Waitlist gate secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitlistConfig {
    /// Shared access code users type in.
    #[serde(default)]
    pub access_code: Option<String>,
    /// HMAC key for the access cookie. Must differ from `access_code`.
    #[serde(default)]
    pub cookie_secret: Option<String>,
}

/// Identity provider (Supabase-compatible) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default = "default_access_token_cookie")]
    pub access_token_cookie: String,
    #[serde(default = "default_refresh_token_cookie")]
    pub refresh_token_cookie: String,
    #[serde(default = "default_code_verifier_cookie")]
    pub code_verifier_cookie: String,
}

fn default_access_token_cookie() -> String {
    "sb-access-token".to_string()
}

fn default_refresh_token_cookie() -> String {
    "sb-refresh-token".to_string()
}

fn default_code_verifier_cookie() -> String {
    "sb-code-verifier".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            access_token_cookie: default_access_token_cookie(),
            refresh_token_cookie: default_refresh_token_cookie(),
            code_verifier_cookie: default_code_verifier_cookie(),
        }
    }
}

/// Origins the service is allowed to redirect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_primary_origin")]
    pub primary_origin: String,
    #[serde(default = "default_dev_origin")]
    pub dev_origin: String,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        DEV_APP_ORIGIN.to_string(),
        PRIMARY_APP_ORIGIN.to_string(),
        "https://www.udfall.com".to_string(),
    ]
}

fn default_primary_origin() -> String {
    PRIMARY_APP_ORIGIN.to_string()
}

fn default_dev_origin() -> String {
    DEV_APP_ORIGIN.to_string()
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            primary_origin: default_primary_origin(),
            dev_origin: default_dev_origin(),
        }
    }
}

/// Trim a raw value and treat blank strings as unset.
fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match non_empty(raw) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key} value {v:?}: {e}")),
        None => Ok(None),
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Override fields from process environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Override fields using `lookup` as the variable source.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_empty(lookup(key));

        if let Some(env) = var("APP_ENV").or_else(|| var("NODE_ENV")) {
            self.environment = Environment::parse(&env);
        }
        if let Some(addr) = var("BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Some(url) = var("API_URL") {
            self.backend.api_url = Some(url);
        }
        if let Some(url) = var("NEXT_PUBLIC_API_URL") {
            self.backend.public_api_url = Some(url);
        }
        if let Some(v) = parse_var("BACKEND_TIMEOUT_SECS", lookup("BACKEND_TIMEOUT_SECS"))? {
            self.backend.timeout_secs = v;
        }
        if let Some(v) = parse_var(
            "BACKEND_CONNECT_TIMEOUT_SECS",
            lookup("BACKEND_CONNECT_TIMEOUT_SECS"),
        )? {
            self.backend.connect_timeout_secs = v;
        }
        if let Some(v) = parse_var("BACKEND_MAX_ATTEMPTS", lookup("BACKEND_MAX_ATTEMPTS"))? {
            self.backend.max_attempts = v;
        }
        if let Some(v) = parse_var("BACKEND_RETRY_BACKOFF_MS", lookup("BACKEND_RETRY_BACKOFF_MS"))? {
            self.backend.retry_backoff_ms = v;
        }

        if let Some(code) = var("WAITLIST_ACCESS_CODE") {
            self.waitlist.access_code = Some(code);
        }
        if let Some(secret) = var("WAITLIST_COOKIE_SECRET") {
            self.waitlist.cookie_secret = Some(secret);
        }

        if let Some(url) = var("SUPABASE_URL").or_else(|| var("NEXT_PUBLIC_SUPABASE_URL")) {
            self.identity.url = Some(url);
        }
        if let Some(key) = var("SUPABASE_ANON_KEY").or_else(|| var("NEXT_PUBLIC_SUPABASE_ANON_KEY")) {
            self.identity.anon_key = Some(key);
        }

        self.normalize();
        self.validate()
    }

    /// Trim secrets and URLs loaded from the TOML file.
    fn normalize(&mut self) {
        self.backend.api_url = non_empty(self.backend.api_url.take());
        self.backend.public_api_url = non_empty(self.backend.public_api_url.take());
        self.waitlist.access_code = non_empty(self.waitlist.access_code.take());
        self.waitlist.cookie_secret = non_empty(self.waitlist.cookie_secret.take());
        self.identity.url = non_empty(self.identity.url.take());
        self.identity.anon_key = non_empty(self.identity.anon_key.take());
    }

    /// Reject combinations that would weaken the gate or stall the proxy.
    pub fn validate(&self) -> Result<()> {
        if let (Some(code), Some(secret)) =
            (&self.waitlist.access_code, &self.waitlist.cookie_secret)
            && code == secret
        {
            bail!("WAITLIST_COOKIE_SECRET must differ from WAITLIST_ACCESS_CODE");
        }
        if self.backend.max_attempts == 0 {
            bail!("backend.max_attempts must be at least 1");
        }
        if self.backend.timeout_secs == 0 {
            bail!("backend.timeout_secs must be positive");
        }
        if self.backend.connect_timeout_secs == 0 {
            bail!("backend.connect_timeout_secs must be positive");
        }
        Ok(())
    }
}

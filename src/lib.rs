pub mod auth_routes;
pub mod client;
pub mod config;
pub mod cookie;
pub mod error;
pub mod identity;
pub mod proxy;
pub mod redirect;
pub mod server;
pub mod waitlist;

/// Same-origin prefix the backend proxy is mounted under.
pub const BACKEND_PROXY_PREFIX: &str = "/api/backend";

/// Upstream used when no base URL is configured and the environment is
/// explicitly `development`.
pub const DEV_DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Public origin of the deployed app.
pub const PRIMARY_APP_ORIGIN: &str = "https://udfall.com";

/// Origin of the local dev server.
pub const DEV_APP_ORIGIN: &str = "http://localhost:3000";

/// Name of the signed waitlist access cookie.
pub const WAITLIST_COOKIE_NAME: &str = "udfall_waitlist_access";

/// Lifetime of the waitlist access cookie (30 days).
pub const WAITLIST_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 30;

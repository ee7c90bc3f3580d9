use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::WAITLIST_COOKIE_NAME;
use crate::auth_routes;
use crate::config::AppConfig;
use crate::cookie::read_cookie;
use crate::error::AppError;
use crate::identity::{AuthUser, IdentityProvider, SessionCookies};
use crate::proxy::{BackendProxy, ForwardRequest, UpstreamResponse};
use crate::redirect::RedirectPolicy;
use crate::waitlist::{GateStatus, WaitlistGate};

/// Shared, per-process handler state. Every field is either cheap to clone
/// or behind an `Arc`; nothing is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub proxy: BackendProxy,
    pub gate: Arc<WaitlistGate>,
    pub identity: Arc<dyn IdentityProvider>,
    pub redirects: Arc<RedirectPolicy>,
    pub session_cookies: Arc<SessionCookies>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(config: &AppConfig, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        let env = config.environment;
        Ok(Self {
            proxy: BackendProxy::new(&config.backend, env)?,
            gate: Arc::new(WaitlistGate::from_config(&config.waitlist, env)),
            identity,
            redirects: Arc::new(RedirectPolicy::new(&config.redirects, env)?),
            session_cookies: Arc::new(SessionCookies::from_config(&config.identity, env)),
            max_body_bytes: config.backend.max_body_bytes,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route(
            "/api/backend/{*path}",
            get(proxy_handler)
                .post(proxy_handler)
                .put(proxy_handler)
                .patch(proxy_handler)
                .delete(proxy_handler),
        )
        .route("/api/waitlist/unlock", post(unlock_handler))
        .route("/api/waitlist/status", get(status_handler))
        .route("/auth/callback", get(auth_routes::callback))
        .route("/auth/recovery", get(auth_routes::recovery))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve until Ctrl+C, then drain in-flight requests.
pub async fn serve(state: AppState, listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("Listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<UpstreamResponse, AppError> {
    let request = ForwardRequest::from_parts(method, &uri, &headers, body);
    state.proxy.forward(request).await
}

/// Resolve the caller's session. Provider failures count as signed out.
async fn authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<AuthUser, AppError> {
    let token = state
        .session_cookies
        .access_token(headers)
        .ok_or(AppError::Unauthenticated)?;

    match state.identity.get_user(&token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(AppError::Unauthenticated),
        Err(e) => {
            warn!("Identity lookup failed: {e:#}");
            Err(AppError::Unauthenticated)
        }
    }
}

/// `POST /api/waitlist/unlock` with `{ "password": "..." }`.
async fn unlock_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if !state.gate.is_configured() {
        return Err(AppError::GateNotConfigured);
    }

    let user = authenticated_user(&state, &headers).await?;

    let payload: Value = serde_json::from_slice(&body).map_err(|_| AppError::MalformedPayload)?;
    let password = payload
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default();

    if !state.gate.is_correct_access_code(password) {
        info!(user = %user.id, "Rejected waitlist access code");
        return Err(AppError::WrongAccessCode);
    }

    let cookie = state.gate.issue_cookie(&user.id)?;
    let set_cookie = state.gate.set_cookie_header(&cookie)?;
    info!(user = %user.id, "Waitlist unlocked");

    Ok(([(header::SET_COOKIE, set_cookie)], Json(json!({ "ok": true }))).into_response())
}

/// `GET /api/waitlist/status`: whether the caller holds a valid access cookie.
async fn status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let user = authenticated_user(&state, &headers).await?;
    let cookie = read_cookie(&headers, WAITLIST_COOKIE_NAME);
    let status = state.gate.status(cookie.as_deref(), &user.id);

    Ok(Json(json!({
        "configured": status != GateStatus::Unconfigured,
        "granted": status.is_granted(),
        "status": status,
    })))
}

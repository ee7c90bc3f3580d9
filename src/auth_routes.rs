//! Landing routes for identity-provider email links.
//!
//! `/auth/callback` handles sign-up confirmation, magic links and OAuth
//! returns; `/auth/recovery` handles password-reset links. Both turn the
//! link into a session (stored as cookies) and redirect, and both only
//! redirect to allow-listed origins.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use serde::Deserialize;
use tracing::{info, warn};

use crate::identity::{AuthError, AuthSession, EmailOtpType};
use crate::redirect::{normalize_next_path, request_origin};
use crate::server::AppState;

pub const SIGNUP_CONFIRMED_INFO: &str = "Email confirmed. You can now sign in.";
const MISSING_AUTH_CODE: &str = "Missing authentication code.";
const MISSING_RESET_CODE: &str = "Missing password reset code.";
const MAGICLINK_OTHER_DEVICE: &str =
    "Open the one-time link on the same device where you requested it.";
const RESET_OTHER_DEVICE: &str =
    "Open the password reset link on the same device where you requested it.";
const RESET_PASSWORD_PATH: &str = "/account/reset-password";

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub flow: Option<String>,
    pub next: Option<String>,
}

impl CallbackParams {
    fn token_hash(&self) -> Option<&str> {
        self.token_hash.as_deref().filter(|v| !v.is_empty())
    }

    fn code(&self) -> Option<&str> {
        self.code.as_deref().filter(|v| !v.is_empty())
    }
}

/// Message shown on the sign-in page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigninNotice {
    Error(String),
    Info(String),
}

fn redirect_with_cookies(cookies: Vec<HeaderValue>, location: &str) -> Response {
    let set_cookies: Vec<_> = cookies
        .into_iter()
        .map(|value| (header::SET_COOKIE, value))
        .collect();
    (AppendHeaders(set_cookies), Redirect::temporary(location)).into_response()
}

fn signin_redirect(
    state: &AppState,
    origin: Option<&str>,
    notice: SigninNotice,
    cookies: Vec<HeaderValue>,
) -> Response {
    let mut url = state.redirects.resolve(origin, Some("/signin"), "/signin");
    let (key, msg) = match &notice {
        SigninNotice::Error(msg) => ("error", msg),
        SigninNotice::Info(msg) => ("info", msg),
    };
    url.query_pairs_mut().append_pair(key, msg);
    redirect_with_cookies(cookies, url.as_str())
}

fn session_cookies(state: &AppState, session: &AuthSession) -> Vec<HeaderValue> {
    state.session_cookies.session_headers(session)
}

/// `GET /auth/callback`
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let origin = request_origin(&headers);
    let origin = origin.as_deref();
    let otp_type = params.kind.as_deref().and_then(EmailOtpType::parse);
    let flow = params.flow.as_deref();
    let is_signup_flow = flow == Some("signup") || otp_type == Some(EmailOtpType::Signup);
    let next_path = normalize_next_path(params.next.as_deref(), "/markets");

    let (result, used_code_exchange) =
        if let (Some(token_hash), Some(kind)) = (params.token_hash(), otp_type) {
            (state.identity.verify_otp(kind, token_hash).await, false)
        } else if let Some(code) = params.code() {
            let verifier = state.session_cookies.code_verifier(&headers);
            let result = state
                .identity
                .exchange_code_for_session(code, verifier.as_deref())
                .await;
            (result, true)
        } else {
            return signin_redirect(
                &state,
                origin,
                SigninNotice::Error(MISSING_AUTH_CODE.to_string()),
                Vec::new(),
            );
        };

    match result {
        Ok(session) => {
            info!(user = ?session.user.as_ref().map(|u| &u.id), "Auth callback established session");
            let cookies = session_cookies(&state, &session);
            if is_signup_flow {
                return signin_redirect(
                    &state,
                    origin,
                    SigninNotice::Info(SIGNUP_CONFIRMED_INFO.to_string()),
                    cookies,
                );
            }
            let target = state.redirects.resolve(origin, Some(next_path), "/markets");
            redirect_with_cookies(cookies, target.as_str())
        }
        // OTP links carry no verifier.
        Err(e) if used_code_exchange && e.is_code_verifier_error() => {
            warn!(flow = ?flow, "Auth link opened without matching code verifier");
            let notice = if flow == Some("magiclink") {
                SigninNotice::Error(MAGICLINK_OTHER_DEVICE.to_string())
            } else {
                SigninNotice::Info(SIGNUP_CONFIRMED_INFO.to_string())
            };
            signin_redirect(&state, origin, notice, Vec::new())
        }
        Err(e) => auth_failure(&state, origin, &e),
    }
}

/// `GET /auth/recovery`
pub async fn recovery(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let origin = request_origin(&headers);
    let origin = origin.as_deref();

    let result = if let Some(token_hash) = params.token_hash() {
        state
            .identity
            .verify_otp(EmailOtpType::Recovery, token_hash)
            .await
    } else if let Some(code) = params.code() {
        let verifier = state.session_cookies.code_verifier(&headers);
        match state
            .identity
            .exchange_code_for_session(code, verifier.as_deref())
            .await
        {
            Err(e) if e.is_code_verifier_error() => {
                return signin_redirect(
                    &state,
                    origin,
                    SigninNotice::Error(RESET_OTHER_DEVICE.to_string()),
                    Vec::new(),
                );
            }
            other => other,
        }
    } else {
        return signin_redirect(
            &state,
            origin,
            SigninNotice::Error(MISSING_RESET_CODE.to_string()),
            Vec::new(),
        );
    };

    match result {
        Ok(session) => {
            let cookies = session_cookies(&state, &session);
            let target = state
                .redirects
                .resolve(origin, Some(RESET_PASSWORD_PATH), "/markets");
            redirect_with_cookies(cookies, target.as_str())
        }
        Err(e) => auth_failure(&state, origin, &e),
    }
}

fn auth_failure(state: &AppState, origin: Option<&str>, err: &AuthError) -> Response {
    warn!("Auth link rejected: {err}");
    signin_redirect(
        state,
        origin,
        SigninNotice::Error(err.message().to_string()),
        Vec::new(),
    )
}

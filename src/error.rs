use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::waitlist::GateError;

/// Errors surfaced by the HTTP handlers.
///
/// Proxy errors render as `{ detail, upstream? }` so the browser client can
/// read `detail`; waitlist errors render as `{ error }`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing API base URL. Set API_URL (preferred) or NEXT_PUBLIC_API_URL on the server.")]
    MissingApiBaseUrl,

    #[error("Invalid backend path: {0}")]
    InvalidPath(String),

    #[error("Backend request failed: {reason}")]
    Upstream { reason: String, upstream: String },

    #[error("Waitlist gate is not configured on the server.")]
    GateNotConfigured,

    #[error("You must be signed in.")]
    Unauthenticated,

    #[error("Wrong access code.")]
    WrongAccessCode,

    #[error("Invalid request payload.")]
    MalformedPayload,

    #[error("Internal error: {0}")]
    Gate(#[from] GateError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingApiBaseUrl => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::GateNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthenticated | AppError::WrongAccessCode => StatusCode::UNAUTHORIZED,
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Gate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Upstream { upstream, .. } => {
                json!({ "detail": self.to_string(), "upstream": upstream })
            }
            AppError::MissingApiBaseUrl | AppError::InvalidPath(_) => {
                json!({ "detail": self.to_string() })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, [(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
    }
}

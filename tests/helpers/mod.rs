//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

pub mod mock_backend;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use udfall_gateway::config::{AppConfig, Environment};
use udfall_gateway::identity::{
    AuthError, AuthSession, AuthUser, EmailOtpType, IdentityProvider,
};
use udfall_gateway::server::{AppState, router};

/// Identity provider backed by a fixed `token -> user id` table.
#[derive(Default)]
pub struct TokenTable {
    users: HashMap<String, String>,
}

impl TokenTable {
    pub fn with_user(mut self, token: &str, user_id: &str) -> Self {
        self.users.insert(token.to_string(), user_id.to_string());
        self
    }
}

#[async_trait]
impl IdentityProvider for TokenTable {
    async fn get_user(&self, access_token: &str) -> anyhow::Result<Option<AuthUser>> {
        Ok(self.users.get(access_token).map(|id| AuthUser {
            id: id.clone(),
            email: None,
        }))
    }

    async fn verify_otp(
        &self,
        _kind: EmailOtpType,
        _token_hash: &str,
    ) -> Result<AuthSession, AuthError> {
        Err(AuthError::Rejected("Email link is invalid or has expired".into()))
    }

    async fn exchange_code_for_session(
        &self,
        _code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<AuthSession, AuthError> {
        Err(AuthError::Rejected("invalid flow state".into()))
    }
}

/// Production config pointing the proxy at `backend`, with fast retries.
pub fn gateway_config(backend: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = Environment::Production;
    config.backend.api_url = Some(backend.to_string());
    config.backend.max_attempts = 3;
    config.backend.retry_backoff_ms = 1;
    config.backend.timeout_secs = 5;
    config
}

/// Serve the gateway on an ephemeral port.
pub async fn start_gateway(
    config: &AppConfig,
    identity: TokenTable,
) -> (SocketAddr, JoinHandle<()>) {
    let state = AppState::new(config, Arc::new(identity)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (addr, handle)
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

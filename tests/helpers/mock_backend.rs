//! Mock backend API that records every request it receives.
//!
//! Routes:
//! - `GET /markets` returns a JSON market list
//! - `POST /orders` echoes the body with 201
//! - `/unavailable` always returns 503
//! - `GET /plain` returns a text body
//! - `/flaky` returns 502 on its first hit, then 200
//! - `/slow` always stalls for [`SLOW_RESPONSE`] before answering
//! - `/slow-once` stalls on its first hit only
//! - `/echo` answers 200 with the request body
//! - anything else is a JSON 404 with a `detail` field

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Longer than any gateway timeout the tests configure.
pub const SLOW_RESPONSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockBackendHandle {
    pub addr: SocketAddr,
    backend: MockBackend,
    task: JoinHandle<()>,
}

impl MockBackendHandle {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.backend.requests.lock().unwrap().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

impl Drop for MockBackendHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockBackend {
    pub async fn start() -> MockBackendHandle {
        let backend = MockBackend::default();
        let app = Router::new()
            .fallback(handle)
            .with_state(backend.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockBackendHandle {
            addr,
            backend,
            task,
        }
    }
}

async fn handle(
    State(backend): State<MockBackend>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let hit = {
        let mut requests = backend.requests.lock().unwrap();
        requests.push(RecordedRequest {
            method: method.clone(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body: body.clone(),
        });
        requests.iter().filter(|r| r.path == uri.path()).count()
    };

    match uri.path() {
        "/markets" if method == Method::GET => (
            [("x-backend", "mock")],
            axum::Json(json!({ "markets": [{ "id": "m1", "category": "sports" }] })),
        )
            .into_response(),
        "/orders" if method == Method::POST => (
            StatusCode::CREATED,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        "/unavailable" => (StatusCode::SERVICE_UNAVAILABLE, "down").into_response(),
        "/plain" if method == Method::GET => "pong".into_response(),
        "/flaky" if hit == 1 => (StatusCode::BAD_GATEWAY, "warming up").into_response(),
        "/flaky" => "recovered".into_response(),
        "/slow" => {
            tokio::time::sleep(SLOW_RESPONSE).await;
            "too late".into_response()
        }
        "/slow-once" => {
            if hit == 1 {
                tokio::time::sleep(SLOW_RESPONSE).await;
            }
            "eventually".into_response()
        }
        "/echo" => (
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "detail": "Not Found" })),
        )
            .into_response(),
    }
}

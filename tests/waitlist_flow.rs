//! Unlock then status, over real HTTP, the way a signed-in browser does it.

mod helpers;

use reqwest::{StatusCode, header};
use serde_json::{Value, json};

use helpers::{TokenTable, gateway_config, start_gateway};
use udfall_gateway::WAITLIST_COOKIE_NAME;
use udfall_gateway::client::ApiClient;

fn gated_config() -> udfall_gateway::config::AppConfig {
    let mut config = gateway_config("http://127.0.0.1:9");
    config.waitlist.access_code = Some("letmein".into());
    config.waitlist.cookie_secret = Some("a-distinct-cookie-secret".into());
    config
}

fn identities() -> TokenTable {
    TokenTable::default()
        .with_user("token-alice", "alice")
        .with_user("token-bob", "bob")
}

/// `name=value` from the first Set-Cookie for `name`.
fn cookie_pair(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

async fn status(gateway: &str, token: &str, cookie: Option<&str>) -> (StatusCode, Value) {
    let mut req = reqwest::Client::new()
        .get(format!("{gateway}/api/waitlist/status"))
        .bearer_auth(token);
    if let Some(cookie) = cookie {
        req = req.header(header::COOKIE, cookie);
    }
    let resp = req.send().await.unwrap();
    let code = resp.status();
    (code, resp.json().await.unwrap())
}

#[tokio::test]
async fn unlocked_cookie_grants_only_its_owner() {
    let (addr, _server) = start_gateway(&gated_config(), identities()).await;
    let gateway = format!("http://{addr}");

    let resp = reqwest::Client::new()
        .post(format!("{gateway}/api/waitlist/unlock"))
        .bearer_auth("token-alice")
        .json(&json!({ "password": "letmein" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let set_cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("Max-Age=2592000"));
    let cookie = cookie_pair(&resp, WAITLIST_COOKIE_NAME).unwrap();
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({ "ok": true }));

    let (code, body) = status(&gateway, "token-alice", Some(&cookie)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["granted"], true);
    assert_eq!(body["status"], "cookie_valid");

    let (_, body) = status(&gateway, "token-bob", Some(&cookie)).await;
    assert_eq!(body["granted"], false);
    assert_eq!(body["status"], "cookie_invalid");

    let (_, body) = status(&gateway, "token-alice", None).await;
    assert_eq!(body["status"], "no_cookie");
}

#[tokio::test]
async fn unlock_rejections_over_http() {
    let (addr, _server) = start_gateway(&gated_config(), identities()).await;
    let gateway = format!("http://{addr}");

    let anonymous = ApiClient::new(&gateway).unwrap();
    let err = anonymous.unlock_waitlist("letmein").await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    let alice = ApiClient::new(&gateway)
        .unwrap()
        .with_access_token("token-alice");
    let err = alice.unlock_waitlist("wrong").await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    let unknown = ApiClient::new(&gateway)
        .unwrap()
        .with_access_token("token-mallory");
    let err = unknown.unlock_waitlist("letmein").await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    assert_eq!(
        alice.unlock_waitlist("letmein").await.unwrap(),
        json!({ "ok": true })
    );
}

#[tokio::test]
async fn unconfigured_gate_is_503_for_everyone() {
    let config = gateway_config("http://127.0.0.1:9");
    let (addr, _server) = start_gateway(&config, identities()).await;

    let alice = ApiClient::new(&format!("http://{addr}"))
        .unwrap()
        .with_access_token("token-alice");
    let err = alice.unlock_waitlist("letmein").await.unwrap_err();
    assert_eq!(err.status(), Some(503));

    let (code, body) = status(&format!("http://{addr}"), "token-alice", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["configured"], false);
    assert_eq!(body["granted"], false);
}

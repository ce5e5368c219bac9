//! Shared harness for the integration tests: a router over a migrated pool,
//! plus request plumbing.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;

use inklist_server::api::rest::handlers::AppState;
use inklist_server::api::rest::routes::create_router;
use inklist_server::config::Config;
use inklist_server::db::Store;
use inklist_server::peers::Aggregator;
use inklist_server::ratelimit::BucketMap;

/// The client address tests present via the proxy header.
pub const CLIENT_IP: &str = "203.0.113.7";

pub fn test_config() -> Config {
    let mut cfg = Config {
        name: "test directory".to_string(),
        description: "integration test instance".to_string(),
        database: "test.db".to_string(),
        // Tests drive the router with oneshot requests, so the client address
        // comes from headers rather than a socket.
        proxy_headers: true,
        // No live drawing server around to probe.
        check_server: false,
        enable_admin_api: true,
        roomcodes: true,
        admin_user: Some("op".to_string()),
        admin_pass: Some("secret".to_string()),
        ..Config::default()
    };
    cfg.normalize().expect("test config must normalize");
    cfg
}

pub fn build_state(pool: SqlitePool, cfg: Config) -> AppState {
    let timeout = cfg.session_timeout;
    AppState {
        cfg: Arc::new(cfg),
        store: Some(Store::from_pool(pool, timeout)),
        limiter: Arc::new(BucketMap::new()),
        peers: Arc::new(
            Aggregator::new(Duration::ZERO, Duration::ZERO, Duration::from_secs(5))
                .expect("client"),
        ),
    }
}

pub fn build_app(pool: SqlitePool, cfg: Config) -> (Router, AppState) {
    let state = build_state(pool, cfg);
    (create_router(state.clone()), state)
}

pub struct TestRequest {
    method: &'static str,
    path: String,
    client_ip: String,
    body: Option<Value>,
    update_key: Option<String>,
    basic_auth: Option<(String, String)>,
}

impl TestRequest {
    pub fn new(method: &'static str, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            client_ip: CLIENT_IP.to_string(),
            body: None,
            update_key: None,
            basic_auth: None,
        }
    }

    pub fn client_ip(mut self, ip: &str) -> Self {
        self.client_ip = ip.to_string();
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn update_key(mut self, key: &str) -> Self {
        self.update_key = Some(key.to_string());
        self
    }

    pub fn basic_auth(mut self, user: &str, pass: &str) -> Self {
        self.basic_auth = Some((user.to_string(), pass.to_string()));
        self
    }

    /// Send through the router and return status plus parsed JSON body (Null
    /// when the body is empty or not JSON).
    pub async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(&self.path)
            .header("x-real-ip", &self.client_ip);

        if let Some(key) = &self.update_key {
            builder = builder.header("x-update-key", key);
        }
        if let Some((user, pass)) = &self.basic_auth {
            let token = STANDARD.encode(format!("{user}:{pass}"));
            builder = builder.header(header::AUTHORIZATION, format!("Basic {token}"));
        }

        let request = match self.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

/// A well-formed announcement body for `CLIENT_IP`.
pub fn announcement(id: &str, title: &str) -> Value {
    serde_json::json!({
        "host": CLIENT_IP,
        "port": 27750,
        "id": id,
        "protocol": "dp:4.21.2",
        "title": title,
        "users": 2,
        "usernames": ["User1", "Other, one"],
        "owner": "User1",
    })
}

/// Announce and return `(listing id, update key)`.
pub async fn announce(app: &Router, id: &str, title: &str) -> (i64, String) {
    let (status, body) = TestRequest::new("POST", "/sessions/")
        .json(announcement(id, title))
        .send(app)
        .await;
    assert_eq!(status, StatusCode::OK, "announce failed: {body}");
    (
        body["id"].as_i64().expect("listing id"),
        body["key"].as_str().expect("update key").to_string(),
    )
}

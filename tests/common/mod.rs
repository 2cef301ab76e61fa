//! In-process harness: a router over a temp-dir SQLite store and a clock the
//! test controls. Requests go through `tower::ServiceExt::oneshot`, so no
//! port is bound.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use scrivener::auth::hash_password;
use scrivener::clock::{Clock, ManualClock};
use scrivener::config::ServerConfig;
use scrivener::server::{AppState, create_router};
use scrivener::store::{SqliteStore, Store};
use scrivener::types::{Role, User};

pub const PASSWORD: &str = "correct-horse";

/// Hashing is deliberately slow, so every fixture user shares one hash.
fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).expect("hash password"))
}

pub struct TestApp {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().expect("create temp dir");

        let mut config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(SqliteStore::new(config.db_path()).expect("open store"));
        store.initialize().expect("initialize store");

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));

        let state = Arc::new(AppState::new(store.clone(), clock.clone(), config));
        let router = create_router(state);

        Self {
            dir,
            store,
            clock,
            router,
        }
    }

    pub fn create_user(&self, username: &str, role: Role) -> User {
        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: password_hash().to_string(),
            role,
            first_name: None,
            last_name: None,
            bio: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        self.store.create_user(&user).expect("create user");
        user
    }

    /// Creates a user and logs them in, returning the user and a bearer token.
    pub async fn user_with_token(&self, username: &str, role: Role) -> (User, String) {
        let user = self.create_user(username, role);
        let token = self.login(&user.email, PASSWORD).await;
        (user, token)
    }

    pub async fn login(&self, login: &str, password: &str) -> String {
        let (status, body) = self.basic_auth_post("/api/v1/token", login, password).await;
        assert_eq!(status, StatusCode::CREATED, "login failed: {body}");
        body["data"]["token"]
            .as_str()
            .expect("token in response")
            .to_string()
    }

    pub async fn basic_auth_post(&self, uri: &str, login: &str, password: &str) -> (StatusCode, Value) {
        let credentials = STANDARD.encode(format!("{login}:{password}"));
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn raw(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.raw(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, token, None).await
    }
}

/// Builds a multipart/form-data body by hand.
pub fn multipart_body(
    boundary: &str,
    file: Option<(&str, &[u8])>,
    fields: &[(&str, &str)],
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

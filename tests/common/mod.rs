#![allow(dead_code)]

use std::sync::{Arc, Once};

use bytes::Bytes;
use serde_json::Value;
use waypost::services::Services;
use waypost::services::memory::MemoryUsers;
use waypost::{Dispatcher, Request, Response};

static TRACING: Once = Once::new();

/// Installs a test subscriber once; `RUST_LOG=waypost=debug` shows the pipeline.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn services(users: &Arc<MemoryUsers>) -> Services {
    Services::new(users.clone(), users.clone())
}

/// A user store seeded with `alice` (password `correct`) and `bob`
/// (password `hunter2`, email `bob@example.com`). Returns their ids.
pub async fn seeded_users() -> (Arc<MemoryUsers>, String, String) {
    let users = Arc::new(MemoryUsers::new());
    let alice = users.add_user("alice", None, "correct").await.expect("seed alice");
    let bob = users.add_user("bob", Some("bob@example.com"), "hunter2").await.expect("seed bob");
    (users, alice, bob)
}

pub struct TestRequest {
    builder: http::request::Builder,
    body: Bytes,
}

impl TestRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        Self { builder: http::Request::builder().method(method).uri(uri), body: Bytes::new() }
    }

    pub fn get(uri: &str) -> Self { Self::new("GET", uri) }
    pub fn post(uri: &str) -> Self { Self::new("POST", uri) }

    pub fn token(mut self, token: &str) -> Self {
        self.builder = self.builder.header("x-auth-token", token);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.builder = self.builder.header(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.builder = self.builder.header("content-type", "application/json");
        self.body = Bytes::from(body.to_string());
        self
    }

    pub fn form(mut self, body: &str) -> Self {
        self.builder = self.builder.header("content-type", "application/x-www-form-urlencoded");
        self.body = Bytes::from(body.to_owned());
        self
    }

    pub fn build(self) -> Request {
        let req = self.builder.body(self.body).expect("valid test request");
        Request::from_http(req, Some("127.0.0.1:40000".parse().expect("addr")))
    }

    pub async fn send(self, dispatcher: &Dispatcher) -> Response {
        dispatcher.handle(self.build()).await
    }

    /// Sends `body` verbatim, keeping any content type already set.
    pub async fn call_raw(mut self, dispatcher: &Dispatcher, body: &str) -> (u16, Value) {
        self.body = Bytes::from(body.to_owned());
        self.call(dispatcher).await
    }

    /// Sends and returns the status code with the parsed envelope.
    pub async fn call(self, dispatcher: &Dispatcher) -> (u16, Value) {
        let res = self.send(dispatcher).await;
        let body = res.json().unwrap_or(Value::Null);
        (res.code(), body)
    }
}

/// Logs in through the default `login` endpoint and returns the token.
pub async fn login(dispatcher: &Dispatcher, base: &str, username: &str, password: &str) -> String {
    let (code, body) = TestRequest::post(&format!("{base}/login"))
        .json(serde_json::json!({ "username": username, "password": password }))
        .call(dispatcher)
        .await;
    assert_eq!(code, 200, "login failed: {body}");
    body["data"]["authToken"].as_str().expect("authToken").to_owned()
}

// tests/common/mod.rs

//! Shared helpers for driving the router in integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;
use updraft::server::{create_router, ServerState, StateOptions};
use updraft::{Event, EventSink, MemoryStore, UpdateStore};

pub const ADMIN_TOKEN: &str = "test-token";

/// Collected response parts
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Forwards every event into a channel
pub struct ChannelSink(pub mpsc::UnboundedSender<Event>);

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: &Event) -> anyhow::Result<()> {
        self.0.send(event.clone())?;
        Ok(())
    }
}

/// Router over a fresh memory store; returns the store for direct inspection
pub fn app_with(options: StateOptions) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = ServerState::new(store.clone(), options);
    (create_router(Arc::new(state)), store)
}

pub fn open_app() -> (Router, Arc<MemoryStore>) {
    app_with(StateOptions::default())
}

/// Router over an arbitrary store
pub fn app_over(store: Arc<dyn UpdateStore>, options: StateOptions) -> Router {
    create_router(Arc::new(ServerState::new(store, options)))
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: &Router, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &Router, uri: &str, token: Option<&str>, body: &Value) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

/// Manifest request headers for the default iOS key
pub fn ios_headers() -> Vec<(&'static str, &'static str)> {
    vec![("expo-platform", "ios"), ("expo-runtime-version", "1.0.0")]
}

pub fn manifest_json(id: &str) -> Value {
    json!({
        "id": id,
        "createdAt": "2025-01-01T00:00:00Z",
        "runtimeVersion": "1.0.0",
        "launchAsset": {
            "hash": "bundlehash",
            "key": "bundle",
            "contentType": "application/javascript",
            "fileExtension": ".js",
            "url": "/assets/bundlehash"
        },
        "assets": [],
        "metadata": {},
        "extra": {}
    })
}

/// Publish body for (channel, 1.0.0, ios)
pub fn publish_body(id: &str, channel: &str) -> Value {
    json!({
        "manifest": manifest_json(id),
        "channel": channel,
        "runtimeVersion": "1.0.0",
        "platform": "ios"
    })
}

pub async fn publish(app: &Router, token: Option<&str>, body: Value) -> TestResponse {
    post_json(app, "/admin/publish", token, &body).await
}

/// Manifest JSON of the first multipart part
pub fn manifest_part(body: &str) -> &str {
    let start = body.find("\r\n\r\n").unwrap() + 4;
    let end = body[start..].find("\r\n--updraft-boundary").unwrap() + start;
    &body[start..end]
}

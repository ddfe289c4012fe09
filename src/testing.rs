//! Throwaway upstream servers for tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// A running upstream bound to a loopback port.
pub struct Upstream {
    pub addr: SocketAddr,
}

impl Upstream {
    /// Base URL mimicking `https://swapi.dev/api`.
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }
}

fn films() -> HashMap<&'static str, &'static str> {
    HashMap::from([("1", "1977-05-25"), ("2", "1980-05-17"), ("3", "1983-05-25")])
}

async fn film(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    match films().get(id.as_str()) {
        Some(date) => (StatusCode::OK, Json(json!({ "release_date": date }))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found" }))),
    }
}

async fn slow(Path(millis): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Json(json!({ "slept": millis }))
}

async fn status(Path(code): Path<u16>) -> (StatusCode, String) {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("upstream says {}", code))
}

async fn echo(
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    Json(json!({
        "method": method.as_str(),
        "query": query,
        "body": String::from_utf8_lossy(&body),
        "host": header("host"),
        "x-forwarded-for": header("x-forwarded-for"),
        "x-forwarded-host": header("x-forwarded-host"),
    }))
}

/// Start an upstream serving:
///
/// - `GET /api/` and `GET /api/people` (echoes the query)
/// - `GET /api/films/` (the film count) and `GET /api/films/{id}` for films 1 to 3
/// - `GET /api/slow/{millis}`
/// - `GET /api/status/{code}`
/// - `GET /api/text`
/// - `ANY /api/echo`
pub async fn spawn_upstream() -> Upstream {
    let app = Router::new()
        .route("/api/", get(|| async { Json(json!({ "films": "/api/films/" })) }))
        .route(
            "/api/people",
            get(|RawQuery(query): RawQuery| async move { Json(json!({ "query": query })) }),
        )
        .route("/api/films/", get(|| async { Json(json!({ "count": films().len() })) }))
        .route("/api/films/{id}", get(film))
        .route("/api/slow/{millis}", get(slow))
        .route("/api/status/{code}", get(status))
        .route("/api/text", get(|| async { "plain text" }))
        .route("/api/echo", any(echo));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Upstream { addr }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

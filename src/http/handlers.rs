//! HTTP handlers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::proxy::{method_has_body, BatchRequest, BatchResponse, Gateway, ProxyRequest};

/// Largest inbound body read into memory.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Liveness probe.
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

/// `/{service}/{path}` for every method.
pub async fn proxy(State(gateway): State<Arc<Gateway>>, request: Request) -> Result<Response> {
    let client = client_ip(&request);
    let (parts, body) = request.into_parts();

    let (service, path) = split_service(parts.uri.path());
    let path = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let body = if method_has_body(&parts.method) {
        Some(read_body(body).await?)
    } else {
        None
    };

    let request = ProxyRequest {
        method: parts.method,
        path,
        headers: parts.headers,
        body,
    };

    let response = gateway.proxy(service, client, request).await?;
    Ok(response.into_response())
}

/// `POST /proxy_batch/{service}`.
pub async fn proxy_batch(
    State(gateway): State<Arc<Gateway>>,
    Path(service): Path<String>,
    request: Request,
) -> Result<Json<BatchResponse>> {
    let client = client_ip(&request);
    let (parts, body) = request.into_parts();

    let body = read_body(body).await?;
    let batch: BatchRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::Validation(format!("Invalid batch body: {}", e)))?;
    let items = batch.validate()?;

    let items = gateway.batch(&service, client, items, &parts.headers).await?;
    Ok(Json(BatchResponse { items }))
}

fn client_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

async fn read_body(body: Body) -> Result<bytes::Bytes> {
    to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        debug!(error = %e, "Failed to read request body");
        GatewayError::Validation(format!("Unreadable request body: {}", e))
    })
}

/// Split `/{service}/{rest}` into the service name and `/{rest}`.
///
/// Empty segments are dropped, so `rest` never carries a doubled or
/// trailing `/`.
fn split_service(path: &str) -> (&str, String) {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let service = segments.next().unwrap_or_default();
    let rest: Vec<&str> = segments.collect();
    (service, format!("/{}", rest.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_service() {
        assert_eq!(split_service("/swapi/films/1"), ("swapi", "/films/1".to_string()));
        assert_eq!(split_service("/swapi/people/"), ("swapi", "/people".to_string()));
        assert_eq!(split_service("/swapi"), ("swapi", "/".to_string()));
        assert_eq!(split_service("/swapi/"), ("swapi", "/".to_string()));
        assert_eq!(split_service("/"), ("", "/".to_string()));
    }

    #[test]
    fn test_split_service_drops_empty_segments() {
        assert_eq!(
            split_service("//swapi//films///1/"),
            ("swapi", "/films/1".to_string())
        );
    }
}

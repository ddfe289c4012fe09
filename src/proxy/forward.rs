//! Outbound request construction and execution.
//!
//! The forwarder joins the service base URL with the proxied path, rewrites
//! the inbound headers for the upstream, and classifies transport failures.
//! Upstream HTTP statuses, including 4xx and 5xx, are relayed as-is.

use std::net::IpAddr;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use tracing::{debug, instrument, warn};

use crate::config::ServiceConfig;
use crate::error::{GatewayError, Result};

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A request to relay to a service.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the service base URL, with optional query string
    pub path: String,
    /// Headers already rewritten for the upstream
    pub headers: HeaderMap,
    /// Body, for methods that carry one
    pub body: Option<Bytes>,
}

impl ProxyRequest {
    /// A bodiless GET.
    pub fn get(path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers,
            body: None,
        }
    }
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, Body::from(self.body)).into_response()
    }
}

/// Executes proxied requests over a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Create a forwarder with a default client. Redirects are followed.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Create a forwarder over an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send `request` to `service` and read the full response.
    ///
    /// The service timeout covers the whole exchange, body included.
    #[instrument(
        skip(self, service, request),
        fields(
            service = %service.name,
            method = %request.method,
            path = %request.path
        )
    )]
    pub async fn forward(
        &self,
        service: &ServiceConfig,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse> {
        let url = join_url(&service.host, &request.path);
        debug!(url = %url, "Forwarding request");

        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers)
            .timeout(service.timeout());
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(&url, e))?;
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let body = response.bytes().await.map_err(|e| classify(&url, e))?;

        debug!(url = %url, status = %status, bytes = body.len(), "Upstream responded");
        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a transport failure onto the error taxonomy.
fn classify(url: &str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        warn!(url = %url, error = %err, "Upstream timed out");
        GatewayError::GatewayTimeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        warn!(url = %url, error = %err, "Upstream unreachable");
        GatewayError::BadGateway
    } else {
        warn!(url = %url, error = %err, "Upstream call failed");
        GatewayError::Server(err.to_string())
    }
}

/// Join a base URL and a relative path with exactly one `/` between them.
///
/// Only the seam is reconciled; the rest of the path, trailing slash
/// included, is kept as given. The query string, if any, is kept verbatim.
pub fn join_url(base: &str, path: &str) -> String {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    let mut url = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );

    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Rewrite inbound headers for the upstream.
///
/// The inbound `Host` moves to `X-Forwarded-Host`, `X-Forwarded-For` is set
/// to the caller, and connection-scoped headers are dropped. The client
/// recomputes `Host` and `Content-Length`.
pub fn forwarded_headers(inbound: &HeaderMap, client: Option<IpAddr>) -> Result<HeaderMap> {
    let client = client.ok_or(GatewayError::MissingClientAddress)?;

    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);

    if let Some(host) = headers.remove(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host);
    }

    let client = HeaderValue::from_str(&client.to_string())
        .map_err(|e| GatewayError::Server(format!("invalid client address header: {}", e)))?;
    headers.insert(X_FORWARDED_FOR, client);

    Ok(headers)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are connection-scoped too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Whether the inbound body is relayed for `method`.
pub fn method_has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

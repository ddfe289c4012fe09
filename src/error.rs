//! Error types for the Proxygate service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// Main error type for Proxygate operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The caller exhausted the quota of the target service
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The upstream did not answer within the service timeout
    #[error("Upstream timed out")]
    GatewayTimeout,

    /// The upstream could not be reached at the network level
    #[error("Upstream unreachable")]
    BadGateway,

    /// Unclassified transport failure or broken internal invariant
    #[error("Server error: {0}")]
    Server(String),

    /// The caller's network address is unknown
    #[error("Client address is unavailable")]
    MissingClientAddress,

    /// Malformed caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// No service is registered under the requested name
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Proxygate operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// JSON body returned for every failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable machine-readable identifier
    pub code: String,
    /// Short label
    pub title: String,
    /// Human readable explanation
    pub description: String,
}

impl ApiError {
    fn new(code: &str, title: &str, description: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
            description: description.into(),
        }
    }
}

const SERVER_ERROR_DESCRIPTION: &str = "Something has gone wrong on the server";

impl GatewayError {
    /// HTTP status the error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BadGateway => StatusCode::BAD_GATEWAY,
            GatewayError::Validation(_) | GatewayError::UnknownService(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            GatewayError::Server(_)
            | GatewayError::MissingClientAddress
            | GatewayError::Store(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the public error body.
    ///
    /// Internal details (store, transport or I/O messages) stay in the logs.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            GatewayError::RateLimitExceeded => ApiError::new(
                "RATE_LIMIT",
                "Rate limit exceeded",
                "Too many requests, try again later.",
            ),
            GatewayError::GatewayTimeout => ApiError::new(
                "GATEWAY_TIMEOUT",
                "Gateway timeout",
                "Server does not receive a timely response from an upstream.",
            ),
            GatewayError::BadGateway => ApiError::new(
                "BAD_GATEWAY",
                "Bad gateway",
                "Invalid response from the upstream server.",
            ),
            GatewayError::Validation(message) => {
                ApiError::new("VALIDATION_ERROR", "Validation error", message.clone())
            }
            GatewayError::UnknownService(name) => ApiError::new(
                "VALIDATION_ERROR",
                "Validation error",
                format!("Unknown service: `{}`", name),
            ),
            GatewayError::MissingClientAddress => ApiError::new(
                "SERVER_ERROR",
                "A server error occurred",
                "Can't limit without client IP-address.",
            ),
            GatewayError::Server(_)
            | GatewayError::Store(_)
            | GatewayError::Config(_)
            | GatewayError::Io(_) => ApiError::new(
                "SERVER_ERROR",
                "A server error occurred",
                SERVER_ERROR_DESCRIPTION,
            ),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = %status, "Request failed");
        } else {
            warn!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(self.to_api_error())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::RateLimitExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(GatewayError::GatewayTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(GatewayError::BadGateway.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            GatewayError::Server("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::Validation("bad".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            GatewayError::UnknownService("nope".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_api_error_codes() {
        assert_eq!(GatewayError::RateLimitExceeded.to_api_error().code, "RATE_LIMIT");
        assert_eq!(GatewayError::BadGateway.to_api_error().code, "BAD_GATEWAY");
        assert_eq!(GatewayError::GatewayTimeout.to_api_error().code, "GATEWAY_TIMEOUT");
        assert_eq!(GatewayError::MissingClientAddress.to_api_error().code, "SERVER_ERROR");
    }

    #[test]
    fn test_unknown_service_is_a_validation_error() {
        let body = GatewayError::UnknownService("starships".to_string()).to_api_error();

        assert_eq!(
            body,
            ApiError {
                code: "VALIDATION_ERROR".to_string(),
                title: "Validation error".to_string(),
                description: "Unknown service: `starships`".to_string(),
            }
        );
    }

    #[test]
    fn test_server_error_hides_details() {
        let body = GatewayError::Server("connection pool poisoned".to_string()).to_api_error();

        assert_eq!(
            body,
            ApiError {
                code: "SERVER_ERROR".to_string(),
                title: "A server error occurred".to_string(),
                description: "Something has gone wrong on the server".to_string(),
            }
        );
    }

    #[test]
    fn test_api_error_serialization() {
        let body = serde_json::to_value(GatewayError::GatewayTimeout.to_api_error()).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "code": "GATEWAY_TIMEOUT",
                "title": "Gateway timeout",
                "description": "Server does not receive a timely response from an upstream.",
            })
        );
    }

    #[test]
    fn test_into_response_status() {
        let response =
            GatewayError::Validation("Path must start with `/`".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

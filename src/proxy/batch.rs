//! Batch request validation and per-item outcomes.

use std::collections::HashSet;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::forward::UpstreamResponse;
use crate::error::{ApiError, GatewayError, Result};

/// Inbound batch payload, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<BatchItemRequest>,
}

/// One inbound batch entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
}

fn default_method() -> String {
    Method::GET.to_string()
}

/// A validated batch entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Always a safe method; only `GET` is accepted
    pub method: Method,
    /// Normalized path, unique within its batch
    pub path: String,
}

impl BatchRequest {
    /// Normalize every path and reject empty batches, unsupported methods
    /// and duplicate paths.
    pub fn validate(self) -> Result<Vec<BatchItem>> {
        if self.items.is_empty() {
            return Err(GatewayError::Validation(
                "Batch must contain at least one item".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        let mut items = Vec::with_capacity(self.items.len());

        for item in self.items {
            if item.method != Method::GET.as_str() {
                return Err(GatewayError::Validation(format!(
                    "Unsupported method `{}`: only `GET` is allowed",
                    item.method
                )));
            }

            let path = normalize_path(&item.path)?;
            if !seen.insert(path.clone()) {
                return Err(GatewayError::Validation(format!(
                    "Found non-unique path: `{}`",
                    path
                )));
            }

            items.push(BatchItem {
                method: Method::GET,
                path,
            });
        }

        Ok(items)
    }
}

/// Trim, require a leading `/`, and lower-case.
pub fn normalize_path(raw: &str) -> Result<String> {
    let path = raw.trim();
    if !path.starts_with('/') {
        return Err(GatewayError::Validation(
            "Path must start with `/`".to_string(),
        ));
    }
    Ok(path.to_lowercase())
}

/// Successful upstream exchange for one batch item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub status_code: u16,
    /// Upstream body as JSON when it parses, otherwise as text
    pub content: Value,
}

impl From<UpstreamResponse> for BatchResult {
    fn from(response: UpstreamResponse) -> Self {
        let content = serde_json::from_slice(&response.body).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&response.body).into_owned())
        });

        Self {
            status_code: response.status.as_u16(),
            content,
        }
    }
}

/// Either a result or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(BatchResult),
    Error(ApiError),
}

/// The outcome of one batch item, keyed by its path.
///
/// Serializes as `{"path": ..., "result": {...}}` or
/// `{"path": ..., "error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub path: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl BatchOutcome {
    /// Capture a forwarding result, turning failures into error entries.
    pub fn new(path: String, result: Result<UpstreamResponse>) -> Self {
        let outcome = match result {
            Ok(response) => Outcome::Result(response.into()),
            Err(err) => Outcome::Error(err.to_api_error()),
        };
        Self { path, outcome }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Batch response body.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub items: Vec<BatchOutcome>,
}

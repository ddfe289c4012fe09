//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::backend::CounterStore;
use super::key::LimiterKey;
use crate::error::{GatewayError, Result};

/// Namespace for limiter counters in a shared store.
const KEY_PREFIX: &str = "limiter:";

/// Turns counter increments into allow/deny decisions.
///
/// The charge is applied before the comparison, so a rejected call still
/// consumes its cost. The store makes the increment atomic; the limiter only
/// compares the total it returns.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Create a rate limiter over a counter store.
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Charge `cost` against `key` and fail if the total now exceeds `max_allowed`.
    ///
    /// `period` bounds the counting window; `None` counts forever.
    pub async fn limit(
        &self,
        key: &LimiterKey,
        max_allowed: u64,
        period: Option<Duration>,
        cost: u64,
    ) -> Result<()> {
        let store_key = format!("{}{}", KEY_PREFIX, key);

        trace!(
            key = %key,
            cost = cost,
            "Checking rate limit"
        );

        let count = self.store.increment(&store_key, cost, period).await?;

        if count > max_allowed {
            debug!(
                key = %key,
                count = count,
                limit = max_allowed,
                "Rate limit exceeded"
            );
            return Err(GatewayError::RateLimitExceeded);
        }

        Ok(())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

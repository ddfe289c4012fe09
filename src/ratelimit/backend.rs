//! Counter store abstraction and DSN-based backend selection.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::memory::MemoryStore;
use super::redis_store::RedisStore;
use crate::config::ExpiryPolicy;
use crate::error::{GatewayError, Result};

/// A keyed integer counter with per-key expiry.
///
/// Implementations must make `increment` atomic per key: concurrent callers
/// sharing a key each observe a distinct post-increment total.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `amount` to the counter stored under `key` and return the new total.
    ///
    /// A missing or expired counter starts over at `amount`. `ttl` of `None`
    /// keeps the counter forever.
    async fn increment(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<u64>;
}

/// The closed set of counter stores, selected once at startup.
#[derive(Debug)]
pub enum CounterBackend {
    /// In-process map, lost on restart
    Memory(MemoryStore),
    /// Shared Redis instance
    Redis(RedisStore),
}

impl CounterBackend {
    /// Build a backend from a DSN whose scheme selects the implementation.
    ///
    /// `mem://` selects the in-process store, `redis://` and `rediss://` the
    /// Redis store. Any other scheme is a configuration error.
    pub fn from_dsn(dsn: &str, expiry: ExpiryPolicy) -> Result<Self> {
        let scheme = dsn.split_once("://").map(|(scheme, _)| scheme);

        let backend = match scheme {
            Some("mem") => CounterBackend::Memory(MemoryStore::new(expiry)),
            Some("redis") | Some("rediss") => CounterBackend::Redis(RedisStore::new(dsn, expiry)?),
            _ => {
                return Err(GatewayError::Config(format!(
                    "Unsupported backend from DSN: `{}`.",
                    dsn
                )))
            }
        };

        info!(backend = backend.name(), expiry = ?expiry, "Counter store selected");
        Ok(backend)
    }

    /// Short backend name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            CounterBackend::Memory(_) => "memory",
            CounterBackend::Redis(_) => "redis",
        }
    }
}

#[async_trait]
impl CounterStore for CounterBackend {
    async fn increment(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<u64> {
        match self {
            CounterBackend::Memory(store) => store.increment(key, amount, ttl).await,
            CounterBackend::Redis(store) => store.increment(key, amount, ttl).await,
        }
    }
}

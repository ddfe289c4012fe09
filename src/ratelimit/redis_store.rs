//! Redis-backed counter store.
//!
//! Counters live in Redis so every gateway instance pointed at the same
//! server shares quota. Expiry is enforced server-side:
//!
//! - `fixed`: a Lua script runs `INCRBY` and sets the expiry only when the
//!   key has none yet, so the window is anchored at its first hit.
//! - `sliding`: `INCRBY` and `EXPIRE` run in one `MULTI` block, pushing the
//!   expiry out on every hit.
//!
//! The connection is opened on first use and then shared through a
//! `ConnectionManager`, which reconnects on its own.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::backend::CounterStore;
use crate::config::ExpiryPolicy;
use crate::error::{GatewayError, Result};

const FIXED_WINDOW_SCRIPT: &str = r"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 and redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return count
";

/// Counter store backed by a Redis server.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    expiry: ExpiryPolicy,
    fixed_window: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Parse the DSN without connecting.
    pub fn new(dsn: &str, expiry: ExpiryPolicy) -> Result<Self> {
        let client = Client::open(dsn)
            .map_err(|e| GatewayError::Config(format!("invalid redis DSN: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            expiry,
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!(addr = %self.client.get_connection_info().addr, "Connected to Redis");
                Ok::<_, GatewayError>(manager)
            })
            .await?;

        Ok(connection.clone())
    }
}

/// Redis expiries have one-second resolution; round up so a sub-second ttl
/// still expires.
fn ttl_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<u64> {
        let mut conn = self.connection().await?;

        let count: u64 = match (ttl, self.expiry) {
            (None, _) => conn.incr(key, amount).await?,
            (Some(ttl), ExpiryPolicy::Fixed) => {
                self.fixed_window
                    .key(key)
                    .arg(amount)
                    .arg(ttl_secs(ttl))
                    .invoke_async(&mut conn)
                    .await?
            }
            (Some(ttl), ExpiryPolicy::Sliding) => {
                let (count,): (u64,) = redis::pipe()
                    .atomic()
                    .incr(key, amount)
                    .expire(key, ttl_secs(ttl))
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                count
            }
        };

        debug!(key = %key, amount = amount, count = count, "Incremented Redis counter");
        Ok(count)
    }
}

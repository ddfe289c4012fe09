//! Rate limiting logic and counter storage.

mod backend;
mod key;
mod limiter;
mod memory;
mod redis_store;

pub use backend::{CounterBackend, CounterStore};
pub use key::LimiterKey;
pub use limiter::RateLimiter;
pub use memory::{CounterRecord, MemoryStore};
pub use redis_store::RedisStore;

//! Proxygate - Rate-Limited Reverse Proxy Gateway
//!
//! This crate implements an HTTP gateway that relays requests to configured
//! upstream services. Each caller is rate limited per service through a
//! pluggable counter store (in-process or Redis), and a batch endpoint fans
//! out many GETs to one service under a per-service concurrency limit.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod ratelimit;

#[cfg(test)]
mod testing;

//! Rate limit key generation.

use std::fmt;
use std::net::IpAddr;

/// Identifies one client's quota against one service.
///
/// Rendered as `{service}:{client}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    /// The service being called
    pub service: String,
    /// The caller's identity, usually its IP address
    pub client: String,
}

impl LimiterKey {
    /// Create a key from a service name and a client identity.
    pub fn new(service: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            client: client.into(),
        }
    }

    /// Create a key for a client identified by its IP address.
    pub fn for_ip(service: &str, ip: IpAddr) -> Self {
        Self::new(service, ip.to_string())
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_to_string() {
        let key = LimiterKey::new("swapi", "client_a");
        assert_eq!(key.to_string(), "swapi:client_a");
    }

    #[test]
    fn test_key_for_ip() {
        let key = LimiterKey::for_ip("swapi", "10.0.0.1".parse().unwrap());
        assert_eq!(key.to_string(), "swapi:10.0.0.1");

        let key = LimiterKey::for_ip("swapi", "::1".parse().unwrap());
        assert_eq!(key.to_string(), "swapi:::1");
    }

    #[test]
    fn test_key_equality() {
        assert_eq!(LimiterKey::new("a", "b"), LimiterKey::new("a", "b"));
        assert_ne!(LimiterKey::new("a", "b"), LimiterKey::new("b", "b"));
    }
}

//! Host addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A target host address, `name` or `name:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    /// Creates a host from an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().trim().to_string())
    }

    /// The full address as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host name without any port suffix.
    #[must_use]
    pub fn name(&self) -> &str {
        match self.split_port() {
            Some((name, _)) => name,
            None => &self.0,
        }
    }

    /// The explicit port, if the address carries one.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.split_port().map(|(_, port)| port)
    }

    /// Whether the address refers to the local machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.name(), "localhost" | "127.0.0.1" | "::1")
    }

    fn split_port(&self) -> Option<(&str, u16)> {
        // Bare IPv6 addresses contain several colons and carry no port.
        if self.0.matches(':').count() != 1 {
            return None;
        }
        let (name, port) = self.0.rsplit_once(':')?;
        port.parse().ok().map(|port| (name, port))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Host {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Host {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_host() {
        let host = Host::new("service.timejust.com");
        assert_eq!(host.name(), "service.timejust.com");
        assert_eq!(host.port(), None);
        assert!(!host.is_local());
    }

    #[test]
    fn test_host_with_port() {
        let host = Host::new("app1.internal:2222");
        assert_eq!(host.name(), "app1.internal");
        assert_eq!(host.port(), Some(2222));
    }

    #[test]
    fn test_local_hosts() {
        assert!(Host::new("localhost").is_local());
        assert!(Host::new("127.0.0.1:22").is_local());
        assert!(Host::new("::1").is_local());
        assert_eq!(Host::new("::1").port(), None);
    }
}

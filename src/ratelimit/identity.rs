//! Client identity keys.

use std::net::{IpAddr, SocketAddr};

/// The key that partitions rate limit state.
///
/// Two identities are the same client exactly when their strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Create an identity from any string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Identity for a remote peer, with the port stripped.
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        Self::from_ip(addr.ip())
    }

    /// Identity for a bare IP address.
    ///
    /// IPv4-mapped IPv6 addresses collapse to their IPv4 form so a dual-stack
    /// listener does not split one client across two keys.
    pub fn from_ip(ip: IpAddr) -> Self {
        let ip = match ip {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self(ip.to_string())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

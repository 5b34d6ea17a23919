pub mod config;
pub mod types;

pub use config::{
    crypto, protocol, ClientConfig, ConfigError, CryptoConfig, MasterConfig, OverlayConfig,
    RouterConfig,
};
pub use types::Timestamp;

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Separator between host and port inside every wire-level address.
pub const ADDRESS_SEPARATOR: char = ';';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing ';' in address: {0}")]
    MissingSeparator(String),
    #[error("empty host in address: {0}")]
    EmptyHost(String),
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
}

/// A reachable TCP endpoint as it travels on the wire (`host;port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn socket_string(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn from_wire(s: &str) -> std::result::Result<Self, AddressError> {
        let (host, port) = s
            .split_once(ADDRESS_SEPARATOR)
            .ok_or_else(|| AddressError::MissingSeparator(s.to_string()))?;

        let host = host.trim();
        if host.is_empty() {
            return Err(AddressError::EmptyHost(s.to_string()));
        }

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.host, ADDRESS_SEPARATOR, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_wire(s)
    }
}

impl From<std::net::SocketAddr> for PeerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_parses_wire_form() {
        let addr: PeerAddress = "127.0.0.1;7001".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("127.0.0.1", 7001));
        assert_eq!(addr.to_string(), "127.0.0.1;7001");
        assert_eq!(addr.socket_string(), "127.0.0.1:7001");
    }

    #[test]
    fn test_peer_address_rejects_missing_separator() {
        let err = PeerAddress::from_wire("127.0.0.1:7001").unwrap_err();
        assert!(matches!(err, AddressError::MissingSeparator(_)));
    }

    #[test]
    fn test_peer_address_rejects_bad_port() {
        let err = PeerAddress::from_wire("127.0.0.1;seventy").unwrap_err();
        assert!(matches!(err, AddressError::InvalidPort(_)));

        let err = PeerAddress::from_wire("127.0.0.1;70000").unwrap_err();
        assert!(matches!(err, AddressError::InvalidPort(_)));
    }

    #[test]
    fn test_peer_address_rejects_empty_host() {
        let err = PeerAddress::from_wire(";5001").unwrap_err();
        assert!(matches!(err, AddressError::EmptyHost(_)));
    }

    #[test]
    fn test_peer_address_from_socket() {
        let socket: std::net::SocketAddr = "10.0.0.2:5001".parse().unwrap();
        assert_eq!(PeerAddress::from(socket).to_string(), "10.0.0.2;5001");
    }

    #[test]
    fn test_peer_address_brackets_ipv6_for_connect() {
        assert_eq!(PeerAddress::new("::1", 5001).socket_string(), "[::1]:5001");
    }
}

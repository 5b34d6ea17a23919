use crate::PeerAddress;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Network protocol constants
pub mod protocol {
    /// Default port the Master listens on
    pub const DEFAULT_MASTER_PORT: u16 = 6000;

    /// Default host for every listener and advertised address
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Maximum frame body size (64 MiB). Each onion layer re-encodes the
    /// previous one as decimal symbols, roughly 8x per hop, so a five-hop
    /// onion of a short message already runs to a few MiB.
    pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

    /// Time allowed for the connection-type token
    pub const CONNECTION_TYPE_TIMEOUT_SECS: u64 = 5;

    /// Registration read timeout (Master side and peer side)
    pub const REGISTRATION_TIMEOUT_SECS: u64 = 10;

    /// Connect/write bound when relaying to the next hop
    pub const RELAY_TIMEOUT_SECS: u64 = 5;

    /// Keep-alive interval on the client's registration connection
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

    /// Router registration attempts before giving up
    pub const REGISTER_ATTEMPTS: u32 = 3;

    /// Fixed backoff between router registration attempts
    pub const REGISTER_BACKOFF_SECS: u64 = 3;
}

/// Toy trapdoor parameters
pub mod crypto {
    /// Lower bound for prime candidates
    ///
    /// 1_100 * 1_103 > 0x10FFFF, so any Unicode scalar value fits under the modulus.
    pub const DEFAULT_PRIME_MIN: u64 = 1_100;

    /// Upper bound for prime candidates
    pub const DEFAULT_PRIME_MAX: u64 = 5_000;
}

/// Master (directory) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub listen_addr: String,
    pub listen_port: u16,

    /// JSON mirror of the directory; `None` disables the mirror
    pub store_path: Option<PathBuf>,

    pub registration_timeout_secs: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: protocol::DEFAULT_HOST.to_string(),
            listen_port: protocol::DEFAULT_MASTER_PORT,
            store_path: None,
            registration_timeout_secs: protocol::REGISTRATION_TIMEOUT_SECS,
        }
    }
}

impl MasterConfig {
    pub fn bind_string(&self) -> String {
        PeerAddress::new(self.listen_addr.as_str(), self.listen_port).socket_string()
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

/// Router (relay) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub listen_addr: String,

    /// 0 lets the OS choose
    pub listen_port: u16,

    pub master_addr: String,
    pub master_port: u16,
    pub register_attempts: u32,
    pub register_backoff_ms: u64,
    pub relay_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen_addr: protocol::DEFAULT_HOST.to_string(),
            listen_port: 5001,
            master_addr: protocol::DEFAULT_HOST.to_string(),
            master_port: protocol::DEFAULT_MASTER_PORT,
            register_attempts: protocol::REGISTER_ATTEMPTS,
            register_backoff_ms: protocol::REGISTER_BACKOFF_SECS * 1000,
            relay_timeout_ms: protocol::RELAY_TIMEOUT_SECS * 1000,
        }
    }
}

impl RouterConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_master(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.master_addr = addr.into();
        self.master_port = port;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.register_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn bind_string(&self) -> String {
        PeerAddress::new(self.listen_addr.as_str(), self.listen_port).socket_string()
    }

    pub fn master_string(&self) -> String {
        PeerAddress::new(self.master_addr.as_str(), self.master_port).socket_string()
    }

    pub fn register_backoff(&self) -> Duration {
        Duration::from_millis(self.register_backoff_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

/// Client (end user) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub username: String,
    pub listen_addr: String,

    /// 0 lets the OS choose
    pub listen_port: u16,

    pub master_addr: String,
    pub master_port: u16,
    pub default_hops: usize,
    pub keepalive_interval_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            listen_addr: protocol::DEFAULT_HOST.to_string(),
            listen_port: 7001,
            master_addr: protocol::DEFAULT_HOST.to_string(),
            master_port: protocol::DEFAULT_MASTER_PORT,
            default_hops: 1,
            keepalive_interval_ms: protocol::KEEPALIVE_INTERVAL_SECS * 1000,
            send_timeout_ms: protocol::RELAY_TIMEOUT_SECS * 1000,
        }
    }
}

impl ClientConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_master(mut self, addr: impl Into<String>, port: u16) -> Self {
        self.master_addr = addr.into();
        self.master_port = port;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn bind_string(&self) -> String {
        PeerAddress::new(self.listen_addr.as_str(), self.listen_port).socket_string()
    }

    pub fn master_string(&self) -> String {
        PeerAddress::new(self.master_addr.as_str(), self.master_port).socket_string()
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(protocol::REGISTRATION_TIMEOUT_SECS)
    }
}

/// Key generation settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub prime_min: u64,
    pub prime_max: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            prime_min: crypto::DEFAULT_PRIME_MIN,
            prime_max: crypto::DEFAULT_PRIME_MAX,
        }
    }
}

/// Whole-deployment configuration, one TOML file for every role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Enable verbose logging
    pub verbose: bool,

    pub master: MasterConfig,
    pub router: RouterConfig,
    pub client: ClientConfig,
    pub crypto: CryptoConfig,
}

impl OverlayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

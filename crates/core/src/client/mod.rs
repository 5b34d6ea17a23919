//! End-user agent: registration, directory queries, sending onions, and the
//! two background tasks (inbound listener and keep-alive).

mod agent;
mod keepalive;
mod listener;

pub use agent::ClientAgent;

use crate::circuit::OnionError;
use crate::protocol::{ConnectionError, ErrorCode, ProtocolError};
use onionnet_common::{PeerAddress, Timestamp};
use std::sync::Arc;
use tracing::{info, warn};

/// A message delivered to this client's listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub body: String,
    pub received_at: Timestamp,
}

/// Why the session with the Master ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Keep-alive got something other than `PONG`
    UnexpectedReply(String),

    /// Keep-alive hit a socket error or timeout
    Transport(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedReply(reply) => write!(f, "unexpected keep-alive reply {:?}", reply),
            Self::Transport(e) => write!(f, "connection lost: {}", e),
        }
    }
}

pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Callbacks a front end registers with the agent
#[derive(Clone)]
pub struct ClientHandlers {
    pub on_message: MessageHandler,
    pub on_disconnect: DisconnectHandler,
}

impl Default for ClientHandlers {
    fn default() -> Self {
        Self {
            on_message: Arc::new(|message: InboundMessage| {
                info!("Message from {}: {}", message.sender, message.body);
            }),
            on_disconnect: Arc::new(|reason: DisconnectReason| {
                warn!("Disconnected from master: {}", reason);
            }),
        }
    }
}

impl ClientHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        self.on_message = Arc::new(handler);
        self
    }

    pub fn on_disconnect<F>(mut self, handler: F) -> Self
    where
        F: Fn(DisconnectReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Arc::new(handler);
        self
    }
}

/// Result of a successful hand-off to the first hop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Hops actually used after clamping
    pub hops: usize,
    pub first_hop: PeerAddress,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    #[error("Cannot listen on {address}: {source}")]
    PortUnavailable {
        address: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Onion(#[from] OnionError),

    #[error("Not connected to master")]
    NotRunning,
}

impl ClientError {
    /// Code of an `ERROR:` reply from the Master, if that is what this is
    pub fn rejection_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol(e) => e.rejection_code(),
            _ => None,
        }
    }
}

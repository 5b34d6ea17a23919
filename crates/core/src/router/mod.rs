//! Relay node: registers with the Master, then peels and forwards onions

mod node;

pub use node::{RelayOutcome, RouterNode};

use crate::circuit::RelayError;
use crate::protocol::{ConnectionError, ProtocolError};

/// Router errors
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Failed to bind relay port: {0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Master rejected request: {0}")]
    Rejected(String),

    #[error("Registration failed after {attempts} attempts: {last}")]
    RegistrationFailed { attempts: u32, last: String },

    #[error("Peer closed before sending a frame")]
    EmptyFrame,

    #[error(transparent)]
    Relay(#[from] RelayError),
}

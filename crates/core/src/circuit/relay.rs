use super::onion::{OnionCodec, OnionEnvelope, PeelError, PeelOutcome};
use crate::crypto::{LayerCipher, PrivateKey};
use onionnet_common::PeerAddress;

/// Relay handler for processing inbound relay frames
pub struct RelayHandler;

impl RelayHandler {
    /// Peel one layer off a relay frame and decide what to do with it
    ///
    /// This function is called by a router for every inbound connection.
    pub fn process<C: LayerCipher>(
        codec: &OnionCodec<C>,
        key: &PrivateKey,
        frame: &str,
    ) -> Result<RelayAction, RelayError> {
        let envelope = OnionEnvelope::from_wire(frame)?;

        match codec.peel(&envelope, key)? {
            PeelOutcome::Relay { next_hop, onion } => Ok(RelayAction::Forward {
                next_hop,
                payload: onion.to_wire(),
            }),

            PeelOutcome::Deliver {
                destination,
                payload,
            } => Ok(RelayAction::Deliver {
                destination,
                payload,
            }),

            PeelOutcome::Terminal(text) => Ok(RelayAction::Terminal(text)),
        }
    }
}

/// Actions to take after peeling a relay frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send the remaining onion to the next router
    Forward {
        next_hop: PeerAddress,
        payload: String,
    },

    /// Hand the cleartext to the recipient's listener
    Deliver {
        destination: PeerAddress,
        payload: String,
    },

    /// Nothing to forward; log only
    Terminal(String),
}

impl RelayAction {
    /// Where the payload goes next, if anywhere
    pub fn destination(&self) -> Option<(&PeerAddress, &str)> {
        match self {
            RelayAction::Forward { next_hop, payload } => Some((next_hop, payload)),
            RelayAction::Deliver {
                destination,
                payload,
            } => Some((destination, payload)),
            RelayAction::Terminal(_) => None,
        }
    }
}

/// Errors in relay processing
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Undecodable relay frame: {0}")]
    Peel(#[from] PeelError),

    #[error("Forwarding to {0} failed: {1}")]
    Forward(PeerAddress, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::HopDescriptor;
    use crate::crypto::KeyPair;

    #[test]
    fn test_process_two_hop_frame() {
        let codec = OnionCodec::new();
        let first = KeyPair::generate().unwrap();
        let second = KeyPair::generate().unwrap();
        let hops = vec![
            HopDescriptor::new(PeerAddress::new("127.0.0.1", 5001), first.public),
            HopDescriptor::new(PeerAddress::new("127.0.0.1", 5002), second.public),
        ];
        let bob = PeerAddress::new("127.0.0.1", 7001);

        let frame = codec.build("hello", "alice", &hops, &bob).unwrap().to_wire();

        let action = RelayHandler::process(&codec, &first.private, &frame).unwrap();
        let (next, payload) = action.destination().unwrap();
        assert_eq!(next, &hops[1].address);
        assert!(matches!(action, RelayAction::Forward { .. }));

        let action = RelayHandler::process(&codec, &second.private, payload).unwrap();
        assert_eq!(
            action,
            RelayAction::Deliver {
                destination: bob,
                payload: "alice:hello".to_string(),
            }
        );
    }

    #[test]
    fn test_process_rejects_non_numeric_frame() {
        let codec = OnionCodec::new();
        let keys = KeyPair::generate().unwrap();

        assert!(matches!(
            RelayHandler::process(&codec, &keys.private, "alice:hello"),
            Err(RelayError::Peel(PeelError::Crypto(_)))
        ));
    }

    #[test]
    fn test_terminal_has_no_destination() {
        assert!(RelayAction::Terminal("x".to_string()).destination().is_none());
    }
}

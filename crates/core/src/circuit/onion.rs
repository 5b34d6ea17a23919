use crate::crypto::{
    decode_symbols, encode_symbols, looks_like_symbols, CryptoError, LayerCipher, PrivateKey,
    TrapdoorCipher,
};
use super::types::HopDescriptor;
use onionnet_common::{AddressError, PeerAddress};

/// Separator between a layer's next-hop header and its remainder
pub const LAYER_SEPARATOR: char = '|';

/// Separator between sender and text in a delivered payload
pub const PAYLOAD_SEPARATOR: char = ':';

/// One encrypted onion layer, as the symbol list that travels on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionEnvelope {
    pub symbols: Vec<u64>,
}

impl OnionEnvelope {
    pub fn new(symbols: Vec<u64>) -> Self {
        Self { symbols }
    }

    /// Comma-separated decimal integers
    pub fn to_wire(&self) -> String {
        encode_symbols(&self.symbols)
    }

    pub fn from_wire(s: &str) -> Result<Self, PeelError> {
        Ok(Self::new(decode_symbols(s)?))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Result of removing one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeelOutcome {
    /// Another layer follows; send `onion` to `next_hop`
    Relay {
        next_hop: PeerAddress,
        onion: OnionEnvelope,
    },

    /// Last layer; `payload` is the cleartext `sender:message` for `destination`
    Deliver {
        destination: PeerAddress,
        payload: String,
    },

    /// Decrypted text carried no header at all
    Terminal(String),
}

/// Builds and peels onions with a pluggable layer cipher
#[derive(Debug, Clone, Default)]
pub struct OnionCodec<C: LayerCipher = TrapdoorCipher> {
    cipher: C,
}

impl OnionCodec<TrapdoorCipher> {
    pub fn new() -> Self {
        Self::with_cipher(TrapdoorCipher::new())
    }
}

impl<C: LayerCipher> OnionCodec<C> {
    pub fn with_cipher(cipher: C) -> Self {
        Self { cipher }
    }

    /// Wrap `sender:plaintext` for `hops`, innermost layer first.
    ///
    /// Layer `i` encrypts `address(i+1) | layer(i+1)` under hop `i`'s key,
    /// where the address after the last hop is `target`. The returned
    /// envelope goes to `hops[0]`.
    pub fn build(
        &self,
        plaintext: &str,
        sender: &str,
        hops: &[HopDescriptor],
        target: &PeerAddress,
    ) -> Result<OnionEnvelope, OnionError> {
        if hops.is_empty() {
            return Err(OnionError::EmptyCircuit);
        }

        let mut body = format!("{}{}{}", sender, PAYLOAD_SEPARATOR, plaintext);
        let mut next = target;
        let mut symbols = Vec::new();

        for hop in hops.iter().rev() {
            let layer = format!("{}{}{}", next, LAYER_SEPARATOR, body);
            symbols = self.cipher.seal(&hop.public_key, &layer);
            body = encode_symbols(&symbols);
            next = &hop.address;
        }

        Ok(OnionEnvelope::new(symbols))
    }

    /// Remove exactly one layer with this hop's private key
    pub fn peel(&self, envelope: &OnionEnvelope, key: &PrivateKey) -> Result<PeelOutcome, PeelError> {
        if envelope.is_empty() {
            return Err(PeelError::Crypto(CryptoError::EmptyPayload));
        }

        let text = self.cipher.open(key, &envelope.symbols);

        let Some((header, remainder)) = text.split_once(LAYER_SEPARATOR) else {
            return Ok(PeelOutcome::Terminal(text));
        };

        let next_hop = PeerAddress::from_wire(header)?;

        if looks_like_symbols(remainder) {
            Ok(PeelOutcome::Relay {
                next_hop,
                onion: OnionEnvelope::from_wire(remainder)?,
            })
        } else {
            Ok(PeelOutcome::Deliver {
                destination: next_hop,
                payload: remainder.to_string(),
            })
        }
    }
}

/// Split a delivered payload into `(sender, message)` at the first `:`
pub fn split_payload(payload: &str) -> Option<(&str, &str)> {
    payload.split_once(PAYLOAD_SEPARATOR)
}

/// Errors building an onion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OnionError {
    #[error("Circuit has no hops")]
    EmptyCircuit,
}

/// Errors peeling a layer
#[derive(Debug, thiserror::Error)]
pub enum PeelError {
    #[error("Malformed layer: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid next-hop header: {0}")]
    InvalidHeader(#[from] AddressError),
}

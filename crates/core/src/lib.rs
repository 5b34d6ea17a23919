pub mod circuit;
pub mod client;
pub mod crypto;
pub mod directory;
pub mod master;
pub mod protocol;
pub mod router;

pub use crypto::{CryptoError, KeyPair, LayerCipher, PrivateKey, PublicKey, TrapdoorCipher};

// Re-export circuit types
pub use circuit::{
    Circuit, CircuitBuilder, CircuitError, HopDescriptor, OnionCodec, OnionEnvelope, PeelOutcome,
    RelayAction, RelayHandler,
};

// Re-export directory types
pub use directory::{DirectoryStore, JsonFileStore, MemoryStore, NullStore, Registry, RouterId};

// Re-export the three roles
pub use client::{ClientAgent, ClientError, ClientHandlers, InboundMessage, SendReceipt};
pub use master::{MasterError, MasterServer};
pub use router::{RouterError, RouterNode};

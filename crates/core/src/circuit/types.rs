use crate::crypto::{is_usable_modulus, PublicKey};
use crate::directory::{RouterDescriptor, RouterId};
use onionnet_common::{PeerAddress, Timestamp, ADDRESS_SEPARATOR};
use serde::{Deserialize, Serialize};

/// Separator between hop segments in a PATH reply
pub const HOP_SEPARATOR: char = '|';

/// Separator between the hop list and the target in a PATH reply
pub const TARGET_SEPARATOR: &str = "||";

/// Unique identifier for a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId(pub u64);

impl CircuitId {
    pub fn generate() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl std::fmt::Display for CircuitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circuit({})", self.0)
    }
}

/// A single hop as seen by the client: address and public key only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopDescriptor {
    /// Known on the Master side; not carried on the wire
    pub router_id: Option<RouterId>,

    pub address: PeerAddress,
    pub public_key: PublicKey,
}

impl HopDescriptor {
    pub fn new(address: PeerAddress, public_key: PublicKey) -> Self {
        Self {
            router_id: None,
            address,
            public_key,
        }
    }

    /// `ip;port;e;n`
    pub fn to_wire(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.address,
            self.public_key.e,
            self.public_key.n,
            sep = ADDRESS_SEPARATOR
        )
    }

    /// Parse `ip;port;e;n`. Fields are taken from the right so the host may
    /// itself contain `:`.
    pub fn from_wire(s: &str) -> Result<Self, CircuitError> {
        let invalid = || CircuitError::InvalidWire(s.to_string());

        let mut fields = s.trim().rsplitn(3, ADDRESS_SEPARATOR);
        let n = fields.next().ok_or_else(invalid)?;
        let e = fields.next().ok_or_else(invalid)?;
        let address = fields.next().ok_or_else(invalid)?;

        let e = e.parse().map_err(|_| invalid())?;
        let n = n.parse().map_err(|_| invalid())?;
        if !is_usable_modulus(n) {
            return Err(invalid());
        }
        let address = PeerAddress::from_wire(address).map_err(|_| invalid())?;

        Ok(Self::new(address, PublicKey::new(e, n)))
    }
}

impl From<RouterDescriptor> for HopDescriptor {
    fn from(router: RouterDescriptor) -> Self {
        Self {
            router_id: Some(router.id),
            address: router.address,
            public_key: router.public_key,
        }
    }
}

/// Complete circuit path from origin to destination.
///
/// Ephemeral: built per request and never stored.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub id: CircuitId,

    /// Hops in the order the message traverses them (entry first)
    pub hops: Vec<HopDescriptor>,

    /// Listening address of the recipient
    pub target: PeerAddress,

    pub created_at: Timestamp,
}

impl Circuit {
    pub fn new(hops: Vec<HopDescriptor>, target: PeerAddress) -> Self {
        Self {
            id: CircuitId::generate(),
            hops,
            target,
            created_at: Timestamp::now(),
        }
    }

    /// Number of hops in the circuit
    pub fn length(&self) -> usize {
        self.hops.len()
    }

    pub fn entry_hop(&self) -> Option<&HopDescriptor> {
        self.hops.first()
    }

    pub fn exit_hop(&self) -> Option<&HopDescriptor> {
        self.hops.last()
    }

    /// `ip1;port1;e1;n1|...||target_ip;target_port`
    pub fn to_wire(&self) -> String {
        let hops: Vec<String> = self.hops.iter().map(HopDescriptor::to_wire).collect();
        format!("{}{}{}", hops.join("|"), TARGET_SEPARATOR, self.target)
    }

    pub fn from_wire(s: &str) -> Result<Self, CircuitError> {
        let s = s.trim();
        let (hops, target) = s
            .rsplit_once(TARGET_SEPARATOR)
            .ok_or_else(|| CircuitError::InvalidWire(s.to_string()))?;

        if hops.is_empty() {
            return Err(CircuitError::InvalidWire(s.to_string()));
        }

        let hops = hops
            .split(HOP_SEPARATOR)
            .map(HopDescriptor::from_wire)
            .collect::<Result<Vec<_>, _>>()?;
        let target =
            PeerAddress::from_wire(target).map_err(|_| CircuitError::InvalidWire(s.to_string()))?;

        Ok(Self::new(hops, target))
    }
}

/// Errors in circuit construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("No routers available")]
    NoRoutersAvailable,

    #[error("Malformed circuit description: {0}")]
    InvalidWire(String),
}

//! Circuit construction on the Master side
//!
//! A circuit is a fresh uniform sample of registered routers, in sampling
//! order, followed by the target user's listening address. No latency or
//! topology weighting is applied.

use super::path_selection::{PathSelectionCriteria, PathSelectionError};
use super::types::{Circuit, CircuitError, HopDescriptor};
use crate::directory::Registry;
use std::sync::Arc;
use tracing::debug;

/// Builds circuits from the live registry
#[derive(Debug, Clone)]
pub struct CircuitBuilder {
    registry: Arc<Registry>,
}

impl CircuitBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Build a circuit from `sender` to `target` with up to `hop_count` hops.
    ///
    /// `hop_count` is clamped to `[1, registered routers]`. Fails with
    /// `TargetNotFound` before looking at routers, and with
    /// `NoRoutersAvailable` only when none are registered.
    pub async fn request_circuit(
        &self,
        sender: &str,
        hop_count: i64,
        target: &str,
    ) -> Result<Circuit, CircuitError> {
        let target_record = self
            .registry
            .lookup_user(target)
            .await
            .filter(|user| user.online)
            .ok_or_else(|| CircuitError::TargetNotFound(target.to_string()))?;

        let criteria = PathSelectionCriteria::from_requested(hop_count);
        let routers = self
            .registry
            .sample_routers(criteria.circuit_length)
            .await
            .map_err(|e| match e {
                PathSelectionError::NoRoutersAvailable => CircuitError::NoRoutersAvailable,
            })?;

        let hops: Vec<HopDescriptor> = routers.into_iter().map(HopDescriptor::from).collect();
        let circuit = Circuit::new(hops, target_record.address);

        debug!(
            "{} for '{}' -> '{}': {} of {} requested hops",
            circuit.id,
            sender,
            target,
            circuit.length(),
            hop_count
        );

        Ok(circuit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, PrivateKey, PublicKey};
    use onionnet_common::PeerAddress;
    use std::collections::HashSet;

    fn keys(e: u64) -> KeyPair {
        KeyPair {
            public: PublicKey::new(e, 3233),
            private: PrivateKey::new(1, 3233),
        }
    }

    async fn registry_with(routers: u16) -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        for i in 0..routers {
            registry
                .add_router(PeerAddress::new("127.0.0.1", 5001 + i), keys(3 + 2 * i as u64))
                .await;
        }
        registry
            .add_or_update_user("bob", PeerAddress::new("127.0.0.1", 7001), PublicKey::new(3, 10))
            .await;
        registry
    }

    #[tokio::test]
    async fn test_no_routers() {
        let builder = CircuitBuilder::new(registry_with(0).await);
        assert_eq!(
            builder.request_circuit("alice", 2, "bob").await.unwrap_err(),
            CircuitError::NoRoutersAvailable
        );
    }

    #[tokio::test]
    async fn test_unknown_target_checked_first() {
        let builder = CircuitBuilder::new(registry_with(0).await);
        assert_eq!(
            builder.request_circuit("alice", 2, "carol").await.unwrap_err(),
            CircuitError::TargetNotFound("carol".to_string())
        );
    }

    #[tokio::test]
    async fn test_hop_count_clamped_to_registered() {
        let builder = CircuitBuilder::new(registry_with(1).await);
        let circuit = builder.request_circuit("alice", 5, "bob").await.unwrap();

        assert_eq!(circuit.length(), 1);
        assert_eq!(circuit.hops[0].router_id, Some(1));
        assert!(circuit.to_wire().ends_with("||127.0.0.1;7001"));
        assert_eq!(circuit.to_wire().matches('|').count(), 2);
    }

    #[tokio::test]
    async fn test_non_positive_hops_give_one() {
        let builder = CircuitBuilder::new(registry_with(3).await);
        assert_eq!(builder.request_circuit("alice", 0, "bob").await.unwrap().length(), 1);
        assert_eq!(builder.request_circuit("alice", -4, "bob").await.unwrap().length(), 1);
    }

    #[tokio::test]
    async fn test_hops_are_distinct() {
        let builder = CircuitBuilder::new(registry_with(6).await);
        let circuit = builder.request_circuit("alice", 4, "bob").await.unwrap();

        let ports: HashSet<_> = circuit.hops.iter().map(|h| h.address.port).collect();
        assert_eq!(ports.len(), 4);
    }
}

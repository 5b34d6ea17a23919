use crate::circuit::{PathSelectionError, PathSelector};
use crate::crypto::{KeyPair, PrivateKey, PublicKey};
use onionnet_common::{PeerAddress, Timestamp};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// Router identifier, assigned by the Master in increasing order
pub type RouterId = u64;

/// Identifies one client registration connection
pub type SessionId = u64;

/// A relay known to the Master
#[derive(Debug, Clone)]
pub struct RouterRecord {
    pub id: RouterId,
    pub address: PeerAddress,
    pub public_key: PublicKey,

    /// Generated by the Master on the router's behalf and retained here
    pub private_key: PrivateKey,

    pub registered_at: Timestamp,
}

impl RouterRecord {
    /// Public snapshot handed out in circuits
    pub fn descriptor(&self) -> RouterDescriptor {
        RouterDescriptor {
            id: self.id,
            address: self.address.clone(),
            public_key: self.public_key,
        }
    }
}

/// Router snapshot without key material the client must never see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterDescriptor {
    pub id: RouterId,
    pub address: PeerAddress,
    pub public_key: PublicKey,
}

/// An end user known to the Master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub address: PeerAddress,
    pub public_key: PublicKey,
    pub online: bool,
    pub last_seen: Timestamp,

    /// Registration connection that currently owns this record
    pub session: SessionId,
}

#[derive(Debug, Default)]
struct RegistryState {
    routers: BTreeMap<RouterId, RouterRecord>,
    users: HashMap<String, UserRecord>,
    last_router_id: RouterId,
    last_session: SessionId,
}

/// The Master's authoritative in-memory directory.
///
/// Every operation takes the single registry lock for its whole duration and
/// never awaits while holding it, so upserts, removals and samples are atomic
/// with respect to each other.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a router under a fresh id
    pub async fn add_router(&self, address: PeerAddress, keys: KeyPair) -> RouterRecord {
        let mut state = self.state.write().await;
        state.last_router_id += 1;

        let record = RouterRecord {
            id: state.last_router_id,
            address,
            public_key: keys.public,
            private_key: keys.private,
            registered_at: Timestamp::now(),
        };
        state.routers.insert(record.id, record.clone());

        debug!("Router {} added at {}", record.id, record.address);
        record
    }

    pub async fn remove_router(&self, id: RouterId) -> Option<RouterRecord> {
        let removed = self.state.write().await.routers.remove(&id);
        if removed.is_some() {
            debug!("Router {} removed", id);
        }
        removed
    }

    pub async fn get_router(&self, id: RouterId) -> Option<RouterRecord> {
        self.state.read().await.routers.get(&id).cloned()
    }

    pub async fn router_count(&self) -> usize {
        self.state.read().await.routers.len()
    }

    /// Upsert by username. The record is always online afterwards and is
    /// owned by a newly issued session id.
    pub async fn add_or_update_user(
        &self,
        username: &str,
        address: PeerAddress,
        public_key: PublicKey,
    ) -> UserRecord {
        let mut state = self.state.write().await;
        state.last_session += 1;

        let record = UserRecord {
            username: username.to_string(),
            address,
            public_key,
            online: true,
            last_seen: Timestamp::now(),
            session: state.last_session,
        };

        if let Some(previous) = state.users.insert(username.to_string(), record.clone()) {
            debug!(
                "User '{}' superseded session {} ({} -> {})",
                username, previous.session, previous.address, record.address
            );
        }

        record
    }

    /// Evict a user unconditionally; the returned record is marked offline
    pub async fn remove_user(&self, username: &str) -> Option<UserRecord> {
        self.state
            .write()
            .await
            .users
            .remove(username)
            .map(|mut record| {
                record.online = false;
                record.last_seen = Timestamp::now();
                record
            })
    }

    /// Evict a user only if `session` still owns the record.
    ///
    /// A superseded connection ending must not evict its successor.
    pub async fn remove_user_session(
        &self,
        username: &str,
        session: SessionId,
    ) -> Option<UserRecord> {
        let mut state = self.state.write().await;

        match state.users.get(username) {
            Some(record) if record.session == session => {}
            _ => return None,
        }

        state.users.remove(username).map(|mut record| {
            record.online = false;
            record.last_seen = Timestamp::now();
            record
        })
    }

    /// Snapshot of online usernames, sorted, optionally leaving one out
    pub async fn list_usernames(&self, excluding: Option<&str>) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .users
            .values()
            .filter(|user| user.online && Some(user.username.as_str()) != excluding)
            .map(|user| user.username.clone())
            .collect();
        names.sort();
        names
    }

    pub async fn lookup_user(&self, username: &str) -> Option<UserRecord> {
        self.state.read().await.users.get(username).cloned()
    }

    /// `k` distinct routers drawn uniformly without replacement, `k` clamped
    /// to `[1, router_count]`. Fails only when no router is registered.
    pub async fn sample_routers(&self, k: usize) -> Result<Vec<RouterDescriptor>, PathSelectionError> {
        let state = self.state.read().await;
        let candidates: Vec<&RouterRecord> = state.routers.values().collect();

        let chosen = PathSelector::select(&candidates, k, &mut rand::thread_rng())?;
        Ok(chosen.into_iter().map(|r| r.descriptor()).collect())
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            routers: state.routers.len(),
            users: state.users.len(),
            online_users: state.users.values().filter(|u| u.online).count(),
            last_router_id: state.last_router_id,
        }
    }
}

/// Point-in-time registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub routers: usize,
    pub users: usize,
    pub online_users: usize,
    pub last_router_id: RouterId,
}

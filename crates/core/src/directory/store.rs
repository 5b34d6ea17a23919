use super::registry::{RouterId, RouterRecord};
use crate::crypto::{PrivateKey, PublicKey};
use async_trait::async_trait;
use onionnet_common::{PeerAddress, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

/// Write-through mirror of the directory.
///
/// The Registry stays authoritative; a store is only ever written, never
/// consulted for routing.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Drop every row. Called once when the Master starts.
    async fn reset(&self) -> Result<(), StoreError>;

    async fn record_router(&self, router: &RouterRecord) -> Result<(), StoreError>;

    async fn remove_router(&self, id: RouterId) -> Result<(), StoreError>;

    /// Upsert, marking the user online as of now
    async fn record_user(
        &self,
        username: &str,
        address: &PeerAddress,
        public_key: &PublicKey,
    ) -> Result<(), StoreError>;

    async fn mark_user_offline(&self, username: &str) -> Result<(), StoreError>;
}

/// Stored router row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterRow {
    pub id: RouterId,
    pub address: PeerAddress,
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Stored user row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub username: String,
    pub address: PeerAddress,
    pub public_key: PublicKey,
    pub online: bool,
    pub last_seen: Timestamp,
}

/// Every row a store holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub routers: BTreeMap<RouterId, RouterRow>,
    pub users: BTreeMap<String, UserRow>,
}

impl StoreSnapshot {
    fn apply_router(&mut self, router: &RouterRecord) {
        self.routers.insert(
            router.id,
            RouterRow {
                id: router.id,
                address: router.address.clone(),
                public_key: router.public_key,
                private_key: router.private_key,
            },
        );
    }

    fn apply_user(&mut self, username: &str, address: &PeerAddress, public_key: &PublicKey) {
        self.users.insert(
            username.to_string(),
            UserRow {
                username: username.to_string(),
                address: address.clone(),
                public_key: *public_key,
                online: true,
                last_seen: Timestamp::now(),
            },
        );
    }

    fn apply_offline(&mut self, username: &str) {
        if let Some(row) = self.users.get_mut(username) {
            row.online = false;
            row.last_seen = Timestamp::now();
        }
    }
}

/// Store that accepts and forgets everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl DirectoryStore for NullStore {
    async fn reset(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_router(&self, _router: &RouterRecord) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove_router(&self, _id: RouterId) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_user(
        &self,
        _username: &str,
        _address: &PeerAddress,
        _public_key: &PublicKey,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn mark_user_offline(&self, _username: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store whose rows can be inspected, and which can be told to
/// fail every write
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<StoreSnapshot>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    fn write<F: FnOnce(&mut StoreSnapshot)>(&self, op: F) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }

        let mut rows = self.rows.lock().map_err(|_| StoreError::Poisoned)?;
        op(&mut rows);
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn reset(&self) -> Result<(), StoreError> {
        self.write(|rows| *rows = StoreSnapshot::default())
    }

    async fn record_router(&self, router: &RouterRecord) -> Result<(), StoreError> {
        self.write(|rows| rows.apply_router(router))
    }

    async fn remove_router(&self, id: RouterId) -> Result<(), StoreError> {
        self.write(|rows| {
            rows.routers.remove(&id);
        })
    }

    async fn record_user(
        &self,
        username: &str,
        address: &PeerAddress,
        public_key: &PublicKey,
    ) -> Result<(), StoreError> {
        self.write(|rows| rows.apply_user(username, address, public_key))
    }

    async fn mark_user_offline(&self, username: &str) -> Result<(), StoreError> {
        self.write(|rows| rows.apply_offline(username))
    }
}

/// Store that rewrites a JSON snapshot file on every mutation
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    rows: tokio::sync::Mutex<StoreSnapshot>,
}

impl JsonFileStore {
    /// Open a store at `path`, loading existing rows if the file exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let rows = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            if data.trim().is_empty() {
                StoreSnapshot::default()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            StoreSnapshot::default()
        };

        Ok(Self {
            path,
            rows: tokio::sync::Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.rows.lock().await.clone()
    }

    // The lock is held across the save so file writes land in mutation order
    async fn write<F: FnOnce(&mut StoreSnapshot) + Send>(&self, op: F) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;

        let mut next = rows.clone();
        op(&mut next);
        self.save(&next).await?;
        *rows = next;

        Ok(())
    }

    // Write to a sibling file and rename so readers never see a partial file
    async fn save(&self, rows: &StoreSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            "Directory store saved ({} routers, {} users) to {}",
            rows.routers.len(),
            rows.users.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for JsonFileStore {
    async fn reset(&self) -> Result<(), StoreError> {
        self.write(|rows| *rows = StoreSnapshot::default()).await
    }

    async fn record_router(&self, router: &RouterRecord) -> Result<(), StoreError> {
        self.write(|rows| rows.apply_router(router)).await
    }

    async fn remove_router(&self, id: RouterId) -> Result<(), StoreError> {
        self.write(|rows| {
            rows.routers.remove(&id);
        })
        .await
    }

    async fn record_user(
        &self,
        username: &str,
        address: &PeerAddress,
        public_key: &PublicKey,
    ) -> Result<(), StoreError> {
        self.write(|rows| rows.apply_user(username, address, public_key)).await
    }

    async fn mark_user_offline(&self, username: &str) -> Result<(), StoreError> {
        self.write(|rows| rows.apply_offline(username)).await
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

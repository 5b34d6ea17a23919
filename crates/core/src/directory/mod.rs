//! Master-side directory: the authoritative in-memory registry and an
//! optional write-through store mirroring it.

mod registry;
mod store;

pub use registry::{
    Registry, RegistryStats, RouterDescriptor, RouterId, RouterRecord, SessionId, UserRecord,
};
pub use store::{
    DirectoryStore, JsonFileStore, MemoryStore, NullStore, RouterRow, StoreError, StoreSnapshot,
    UserRow,
};

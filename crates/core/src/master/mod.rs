mod handler;
mod server;

pub use server::MasterServer;

use crate::directory::StoreError;

/// Master start-up errors. Per-connection failures are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error("Failed to bind listener: {0}")]
    Bind(std::io::Error),

    #[error("Directory store error: {0}")]
    Store(#[from] StoreError),
}

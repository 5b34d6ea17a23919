use super::handler::handle_connection;
use super::MasterError;
use crate::circuit::CircuitBuilder;
use crate::directory::{DirectoryStore, Registry};
use onionnet_common::protocol::CONNECTION_TYPE_TIMEOUT_SECS;
use onionnet_common::{CryptoConfig, MasterConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Everything a connection handler needs, shared across connections
pub(crate) struct MasterContext {
    pub registry: Arc<Registry>,
    pub builder: CircuitBuilder,
    pub store: Arc<dyn DirectoryStore>,
    pub crypto: CryptoConfig,
    pub type_timeout: Duration,
    pub registration_timeout: Duration,
}

/// Directory service: registers routers and clients and hands out circuits
pub struct MasterServer {
    listener: TcpListener,
    context: Arc<MasterContext>,
}

impl MasterServer {
    /// Reset the store and bind the listener
    pub async fn bind(
        config: &MasterConfig,
        crypto: CryptoConfig,
        store: Arc<dyn DirectoryStore>,
    ) -> Result<Self, MasterError> {
        store.reset().await?;

        let listener = TcpListener::bind(config.bind_string())
            .await
            .map_err(MasterError::Bind)?;

        let registry = Arc::new(Registry::new());
        let context = MasterContext {
            builder: CircuitBuilder::new(registry.clone()),
            registry,
            store,
            crypto,
            type_timeout: Duration::from_secs(CONNECTION_TYPE_TIMEOUT_SECS),
            registration_timeout: config.registration_timeout(),
        };

        info!("Master listening on {}", listener.local_addr().map_err(MasterError::Bind)?);

        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MasterError> {
        self.listener.local_addr().map_err(MasterError::Bind)
    }

    /// Shared handle on the live directory
    pub fn registry(&self) -> Arc<Registry> {
        self.context.registry.clone()
    }

    /// Accept connections forever, one task per connection
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New connection from {}", addr);

                    let context = self.context.clone();
                    tokio::spawn(async move {
                        handle_connection(context, stream, addr).await;
                    });
                }
                Err(e) => {
                    // e.g. out of file descriptors
                    error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

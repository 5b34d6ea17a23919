use super::RouterError;
use crate::circuit::{OnionCodec, RelayAction, RelayError, RelayHandler};
use crate::crypto::PrivateKey;
use crate::directory::RouterId;
use crate::protocol::messages::ERROR_PREFIX;
use crate::protocol::{
    Connection, ConnectionType, ProtocolError, Reply, RouterGrant, RouterRegistration,
};
use onionnet_common::protocol::REGISTRATION_TIMEOUT_SECS;
use onionnet_common::{PeerAddress, RouterConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// What happened to one inbound relay frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Remaining onion handed to the next router
    Forwarded { next_hop: PeerAddress },

    /// Cleartext handed to the recipient's listener
    Delivered { destination: PeerAddress },

    /// Nothing to forward
    Terminal(String),
}

/// A registered relay
pub struct RouterNode {
    id: RouterId,
    private_key: PrivateKey,
    address: PeerAddress,
    listener: TcpListener,
    config: RouterConfig,
    codec: OnionCodec,
}

// The private key prints redacted through its own Debug.
impl std::fmt::Debug for RouterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterNode")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("private_key", &self.private_key)
            .finish_non_exhaustive()
    }
}

impl RouterNode {
    /// Bind the relay port, then register with the Master.
    ///
    /// Transport failures are retried with a fixed backoff; an `ERROR:` reply
    /// from the Master aborts immediately.
    pub async fn start(config: RouterConfig) -> Result<Self, RouterError> {
        let listener = TcpListener::bind(config.bind_string())
            .await
            .map_err(RouterError::Bind)?;
        let port = listener.local_addr().map_err(RouterError::Bind)?.port();
        let address = PeerAddress::new(config.listen_addr.clone(), port);

        let grant = Self::register(&config, &address).await?;

        info!("Router {} registered, relaying on {}", grant.id, address);

        Ok(Self {
            id: grant.id,
            private_key: grant.private_key,
            address,
            listener,
            config,
            codec: OnionCodec::new(),
        })
    }

    pub fn id(&self) -> RouterId {
        self.id
    }

    /// Address advertised to the Master
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RouterError> {
        self.listener.local_addr().map_err(RouterError::Bind)
    }

    async fn register(config: &RouterConfig, address: &PeerAddress) -> Result<RouterGrant, RouterError> {
        let attempts = config.register_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::try_register(config, address).await {
                Ok(grant) => return Ok(grant),
                Err(e @ RouterError::Rejected(_)) => return Err(e),
                Err(e) => {
                    warn!("Registration attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(config.register_backoff()).await;
                    }
                }
            }
        }

        Err(RouterError::RegistrationFailed {
            attempts,
            last: last_error,
        })
    }

    async fn try_register(config: &RouterConfig, address: &PeerAddress) -> Result<RouterGrant, RouterError> {
        let limit = Duration::from_secs(REGISTRATION_TIMEOUT_SECS);

        let mut conn = Connection::connect(&config.master_string(), limit).await?;
        conn.send(ConnectionType::Router.as_str()).await?;

        let registration = RouterRegistration {
            address: address.clone(),
        };
        let reply = conn.request(&registration.to_wire(), limit).await?;

        RouterGrant::from_reply(&reply).map_err(|e| match e {
            ProtocolError::Rejected(code) => RouterError::Rejected(code),
            other => RouterError::Protocol(other),
        })
    }

    /// Serve relay connections forever, one task each
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let node = self.clone();
                    tokio::spawn(async move {
                        match node.relay(stream).await {
                            Ok(outcome) => debug!("Relay from {}: {:?}", addr, outcome),
                            // never answered upstream
                            Err(e) => warn!("Dropped relay frame from {}: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Read one frame, peel one layer, pass it on
    async fn relay(&self, stream: TcpStream) -> Result<RelayOutcome, RouterError> {
        let mut inbound = Connection::new(stream)?;
        let Some(frame) = inbound.recv_timeout(self.config.relay_timeout()).await? else {
            return Err(RouterError::EmptyFrame);
        };
        drop(inbound);

        match RelayHandler::process(&self.codec, &self.private_key, &frame)? {
            RelayAction::Forward { next_hop, payload } => {
                self.forward(&next_hop, &payload).await?;
                info!("Router {} forwarded {} bytes to {}", self.id, payload.len(), next_hop);
                Ok(RelayOutcome::Forwarded { next_hop })
            }
            RelayAction::Deliver {
                destination,
                payload,
            } => {
                self.forward(&destination, &payload).await?;
                info!("Router {} delivered message to {}", self.id, destination);
                Ok(RelayOutcome::Delivered { destination })
            }
            RelayAction::Terminal(text) => {
                info!("Router {} reached end of circuit ({} chars)", self.id, text.chars().count());
                Ok(RelayOutcome::Terminal(text))
            }
        }
    }

    async fn forward(&self, to: &PeerAddress, payload: &str) -> Result<(), RelayError> {
        let limit = self.config.relay_timeout();
        let failed = |reason: String| RelayError::Forward(to.clone(), reason);

        let mut conn = Connection::connect(&to.socket_string(), limit)
            .await
            .map_err(|e| failed(e.to_string()))?;

        tokio::time::timeout(limit, conn.send(payload))
            .await
            .map_err(|_| failed("write timed out".to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        if let Err(e) = conn.close().await {
            debug!("Closing connection to {}: {}", to, e);
        }
        Ok(())
    }

    /// Remove this router from the Master's directory
    pub async fn unregister(&self) -> Result<(), RouterError> {
        let limit = Duration::from_secs(REGISTRATION_TIMEOUT_SECS);

        let mut conn = Connection::connect(&self.config.master_string(), limit).await?;
        conn.send(ConnectionType::UnregisterRouter.as_str()).await?;
        let reply = conn.request(&self.id.to_string(), limit).await?;

        if reply == Reply::Ok.to_string() {
            info!("Router {} unregistered", self.id);
            Ok(())
        } else {
            Err(RouterError::Rejected(
                reply.trim_start_matches(ERROR_PREFIX).to_string(),
            ))
        }
    }
}

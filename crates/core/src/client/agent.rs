use super::keepalive::{self, Session};
use super::listener;
use super::{ClientError, ClientHandlers, SendReceipt};
use crate::circuit::{Circuit, OnionCodec, OnionError};
use crate::crypto::PublicKey;
use crate::protocol::{
    is_valid_username, parse_client_accept, parse_online, parse_path, parse_user,
    ClientRegistration, Command, Connection, ConnectionError, ConnectionType, FrameError,
};
use onionnet_common::{ClientConfig, PeerAddress};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// A registered end user.
///
/// Holds the registration connection to the Master for directory queries and
/// keep-alive, and runs a listener that receives terminal deliveries.
pub struct ClientAgent {
    config: ClientConfig,
    address: PeerAddress,
    public_key: PublicKey,
    session: Arc<Session>,
    codec: OnionCodec,
}

impl ClientAgent {
    /// Bind the listening port, register with the Master, start background
    /// tasks. The port is checked before the Master is contacted.
    pub async fn register(config: ClientConfig, handlers: ClientHandlers) -> Result<Self, ClientError> {
        if !is_valid_username(&config.username) {
            return Err(ClientError::InvalidUsername(config.username.clone()));
        }

        let bind = config.bind_string();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| ClientError::PortUnavailable {
                address: bind.clone(),
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| ClientError::PortUnavailable {
                address: bind.clone(),
                source,
            })?
            .port();
        let address = PeerAddress::new(config.listen_addr.clone(), port);

        let limit = config.registration_timeout();
        let mut conn = Connection::connect(&config.master_string(), limit).await?;
        conn.send(ConnectionType::Client.as_str()).await?;

        let registration = ClientRegistration {
            username: config.username.clone(),
            address: address.clone(),
        };
        let reply = conn.request(&registration.to_wire(), limit).await?;
        let public_key = parse_client_accept(&reply)?;

        info!("Registered as '{}', listening on {}", config.username, address);

        let session = Arc::new(Session::new(conn, handlers.on_disconnect));

        tokio::spawn(listener::serve(
            listener,
            session.running.subscribe(),
            handlers.on_message,
            config.send_timeout(),
        ));
        tokio::spawn(keepalive::run(
            session.clone(),
            config.keepalive_interval(),
            config.registration_timeout(),
        ));

        Ok(Self {
            config,
            address,
            public_key,
            session,
            codec: OnionCodec::new(),
        })
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    /// Address other clients deliver to
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Key the Master issued at registration
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// One request/response on the registration connection
    async fn request(&self, command: Command) -> Result<String, ClientError> {
        if !self.is_running() {
            return Err(ClientError::NotRunning);
        }

        let mut guard = self.session.conn.lock().await;
        let conn = guard.as_mut().ok_or(ClientError::NotRunning)?;
        Ok(conn
            .request(&command.to_wire(), self.config.registration_timeout())
            .await?)
    }

    /// Other online users
    pub async fn list_users(&self) -> Result<Vec<String>, ClientError> {
        Ok(parse_online(&self.request(Command::List).await?)?)
    }

    /// A user's listening address and public key, if registered
    pub async fn lookup(&self, username: &str) -> Result<Option<(PeerAddress, PublicKey)>, ClientError> {
        Ok(parse_user(&self.request(Command::Get(username.to_string())).await?)?)
    }

    pub async fn request_circuit(&self, target: &str, hops: i64) -> Result<Circuit, ClientError> {
        let command = Command::Path {
            sender: self.config.username.clone(),
            hops,
            target: target.to_string(),
        };
        Ok(parse_path(&self.request(command).await?)?)
    }

    /// Onion-wrap `text` and hand it to the first hop of a fresh circuit.
    ///
    /// Success means the first router accepted the bytes, not that the
    /// recipient got them.
    pub async fn send_message(&self, target: &str, text: &str, hops: i64) -> Result<SendReceipt, ClientError> {
        if self.lookup(target).await?.is_none() {
            return Err(ClientError::UnknownUser(target.to_string()));
        }

        let circuit = self.request_circuit(target, hops).await?;
        let onion = self
            .codec
            .build(text, &self.config.username, &circuit.hops, &circuit.target)?;
        let entry = circuit.entry_hop().ok_or(OnionError::EmptyCircuit)?;

        let limit = self.config.send_timeout();
        let mut conn = Connection::connect(&entry.address.socket_string(), limit).await?;
        tokio::time::timeout(limit, conn.send(&onion.to_wire()))
            .await
            .map_err(|_| ConnectionError::Frame(FrameError::Timeout))??;
        if let Err(e) = conn.close().await {
            debug!("Closing connection to first hop: {}", e);
        }

        info!(
            "Sent message to '{}' via {} hop(s), entry {}",
            target,
            circuit.length(),
            entry.address
        );

        Ok(SendReceipt {
            hops: circuit.length(),
            first_hop: entry.address.clone(),
        })
    }

    /// Best-effort `QUIT`, then stop both background tasks. The disconnect
    /// callback does not fire.
    pub async fn stop(&self) {
        self.session.stop();

        if let Some(mut conn) = self.session.conn.lock().await.take() {
            if let Err(e) = conn.send(&Command::Quit.to_wire()).await {
                debug!("QUIT not delivered: {}", e);
            }
            if let Err(e) = conn.close().await {
                debug!("Closing master connection: {}", e);
            }
        }

        info!("Client '{}' stopped", self.config.username);
    }
}

impl std::fmt::Debug for ClientAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAgent")
            .field("username", &self.config.username)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.session.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DisconnectReason, InboundMessage};
    use crate::directory::{MemoryStore, Registry};
    use crate::master::MasterServer;
    use crate::protocol::ErrorCode;
    use crate::router::RouterNode;
    use onionnet_common::{CryptoConfig, MasterConfig, RouterConfig};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(3);

    async fn start_master() -> (SocketAddr, Arc<Registry>) {
        let config = MasterConfig {
            listen_port: 0,
            ..MasterConfig::default()
        };
        let server = MasterServer::bind(&config, CryptoConfig::default(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        tokio::spawn(server.run());
        (addr, registry)
    }

    async fn start_routers(master: SocketAddr, count: usize) {
        for _ in 0..count {
            let config = RouterConfig::default()
                .with_port(0)
                .with_master("127.0.0.1", master.port());
            let node = Arc::new(RouterNode::start(config).await.unwrap());
            tokio::spawn(node.run());
        }
    }

    fn client_config(name: &str, master: SocketAddr) -> ClientConfig {
        ClientConfig::new(name)
            .with_port(0)
            .with_master("127.0.0.1", master.port())
    }

    async fn inbox(name: &str, master: SocketAddr) -> (ClientAgent, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers = ClientHandlers::new().on_message(move |message| {
            let _ = tx.send(message);
        });
        let agent = ClientAgent::register(client_config(name, master), handlers)
            .await
            .unwrap();
        (agent, rx)
    }

    #[tokio::test]
    async fn test_single_hop_delivery() {
        let (master, _) = start_master().await;
        start_routers(master, 1).await;

        let (_bob, mut bob_inbox) = inbox("bob", master).await;
        let alice = ClientAgent::register(client_config("alice", master), ClientHandlers::new())
            .await
            .unwrap();

        let receipt = alice.send_message("bob", "hello", 1).await.unwrap();
        assert_eq!(receipt.hops, 1);

        let message = tokio::time::timeout(WAIT, bob_inbox.recv()).await.unwrap().unwrap();
        assert_eq!(message.sender, "alice");
        assert_eq!(message.body, "hello");
    }

    #[tokio::test]
    async fn test_three_hop_delivery() {
        let (master, _) = start_master().await;
        start_routers(master, 3).await;

        let (_bob, mut bob_inbox) = inbox("bob", master).await;
        let alice = ClientAgent::register(client_config("alice", master), ClientHandlers::new())
            .await
            .unwrap();

        let circuit = alice.request_circuit("bob", 3).await.unwrap();
        assert_eq!(circuit.length(), 3);

        let text = "three hops: ünïcödé | ok, 100%";
        let receipt = alice.send_message("bob", text, 3).await.unwrap();
        assert_eq!(receipt.hops, 3);

        let message = tokio::time::timeout(WAIT, bob_inbox.recv()).await.unwrap().unwrap();
        assert_eq!(message.sender, "alice");
        assert_eq!(message.body, text);
    }

    #[tokio::test]
    async fn test_five_hop_delivery() {
        let (master, _) = start_master().await;
        start_routers(master, 5).await;

        let (_bob, mut bob_inbox) = inbox("bob", master).await;
        let alice = ClientAgent::register(client_config("alice", master), ClientHandlers::new())
            .await
            .unwrap();

        let text = "are we still meeting at noon tomorrow? bring the slides, please";
        let receipt = alice.send_message("bob", text, 5).await.unwrap();
        assert_eq!(receipt.hops, 5);

        let message = tokio::time::timeout(Duration::from_secs(30), bob_inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.sender, "alice");
        assert_eq!(message.body, text);
    }

    #[tokio::test]
    async fn test_directory_queries() {
        let (master, _) = start_master().await;
        let (bob, _) = inbox("bob", master).await;
        let alice = ClientAgent::register(client_config("alice", master), ClientHandlers::new())
            .await
            .unwrap();

        assert_eq!(alice.list_users().await.unwrap(), vec!["bob".to_string()]);

        let (address, _) = alice.lookup("bob").await.unwrap().unwrap();
        assert_eq!(address, *bob.address());
        assert!(alice.lookup("nobody").await.unwrap().is_none());

        let err = alice.request_circuit("bob", 2).await.unwrap_err();
        assert_eq!(err.rejection_code(), Some(ErrorCode::NoRoutersAvailable));

        assert!(matches!(
            alice.send_message("nobody", "hi", 1).await,
            Err(ClientError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_evicts_without_callback() {
        let (master, registry) = start_master().await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handlers = ClientHandlers::new().on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let alice = ClientAgent::register(client_config("alice", master), handlers)
            .await
            .unwrap();
        assert!(registry.lookup_user("alice").await.is_some());

        alice.stop().await;
        assert!(!alice.is_running());
        assert!(matches!(alice.list_users().await, Err(ClientError::NotRunning)));

        let mut evicted = false;
        for _ in 0..100 {
            if registry.lookup_user("alice").await.is_none() {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_port_checked_before_master() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        // nothing listens on the master port; the bind error must come first
        let config = ClientConfig::new("alice").with_port(port).with_master("127.0.0.1", 1);
        let err = ClientAgent::register(config, ClientHandlers::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::PortUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_username_rejected_locally() {
        let config = ClientConfig::new("al ice").with_port(0);
        let err = ClientAgent::register(config, ClientHandlers::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidUsername(_)));
    }

    #[tokio::test]
    async fn test_keepalive_non_pong_disconnects_once() {
        // accepts the registration, then answers the first PING wrongly
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream).unwrap();
            assert_eq!(conn.recv().await.unwrap().unwrap(), "CLIENT");
            conn.recv().await.unwrap().unwrap();
            conn.send("OK:3:3233").await.unwrap();

            assert_eq!(conn.recv().await.unwrap().unwrap(), "PING");
            conn.send("NOPE").await.unwrap();

            // hold the socket so only the bad reply can end the session
            while let Ok(Some(_)) = conn.recv().await {}
        });

        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let counter = fired.clone();
        let handlers = ClientHandlers::new().on_disconnect(move |reason| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(reason);
        });

        let config = client_config("alice", master).with_keepalive_interval(Duration::from_millis(20));
        let alice = ClientAgent::register(config, handlers).await.unwrap();
        assert!(alice.is_running());

        let reason = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::UnexpectedReply("NOPE".to_string()));
        assert!(!alice.is_running());

        // further intervals and an explicit stop must not fire it again
        tokio::time::sleep(Duration::from_millis(100)).await;
        alice.stop().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keepalive_transport_loss_disconnects() {
        // accepts the registration, then hangs up on the first PING
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream).unwrap();
            assert_eq!(conn.recv().await.unwrap().unwrap(), "CLIENT");
            conn.recv().await.unwrap().unwrap();
            conn.send("OK:3:3233").await.unwrap();

            assert_eq!(conn.recv().await.unwrap().unwrap(), "PING");
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = ClientHandlers::new().on_disconnect(move |reason| {
            let _ = tx.send(reason);
        });

        let config = client_config("alice", master).with_keepalive_interval(Duration::from_millis(20));
        let alice = ClientAgent::register(config, handlers).await.unwrap();

        let reason = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(matches!(reason, DisconnectReason::Transport(_)));
        assert!(!alice.is_running());
        assert!(matches!(alice.list_users().await, Err(ClientError::NotRunning)));
    }

    #[tokio::test]
    async fn test_debug_names_the_user() {
        let (master, _) = start_master().await;
        let alice = ClientAgent::register(client_config("alice", master), ClientHandlers::new())
            .await
            .unwrap();

        let printed = format!("{:?}", alice);
        assert!(printed.contains("ClientAgent"));
        assert!(printed.contains("alice"));
    }
}

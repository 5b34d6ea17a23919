//! Per-connection state machine
//!
//! `AWAIT_TYPE` reads one token and branches into router registration,
//! client registration (followed by the command loop) or router
//! unregistration. Registration reads are bounded; the command loop is not.

use super::server::MasterContext;
use crate::crypto::KeyPair;
use crate::directory::{RouterId, UserRecord};
use crate::protocol::{
    ClientRegistration, Command, Connection, ConnectionError, ConnectionType, ErrorCode, Reply,
    RouterGrant, RouterRegistration,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

pub(crate) async fn handle_connection(context: Arc<MasterContext>, stream: TcpStream, addr: SocketAddr) {
    let mut conn = match Connection::new(stream) {
        Ok(conn) => conn,
        Err(e) => {
            debug!("Dropping connection from {}: {}", addr, e);
            return;
        }
    };

    let token = match conn.recv_timeout(context.type_timeout).await {
        Ok(Some(token)) => token,
        Ok(None) => return,
        Err(e) => {
            debug!("No connection type from {}: {}", addr, e);
            return;
        }
    };

    let result = match token.parse::<ConnectionType>() {
        Ok(ConnectionType::Router) => register_router(&context, &mut conn).await,
        Ok(ConnectionType::Client) => serve_client(&context, &mut conn).await,
        Ok(ConnectionType::UnregisterRouter) => unregister_router(&context, &mut conn).await,
        Err(e) => {
            warn!("{} from {}", e, addr);
            reply(&mut conn, e.code()).await
        }
    };

    if let Err(e) = result {
        debug!("Connection from {} ended: {}", addr, e);
    }
}

async fn reply(conn: &mut Connection, message: impl Into<Reply>) -> Result<(), ConnectionError> {
    conn.send(&message.into().to_string()).await
}

async fn register_router(context: &MasterContext, conn: &mut Connection) -> Result<(), ConnectionError> {
    let Some(body) = conn.recv_timeout(context.registration_timeout).await? else {
        return Ok(());
    };

    let registration = match RouterRegistration::from_wire(&body) {
        Ok(registration) => registration,
        Err(e) => {
            warn!("Router registration rejected: {}", e);
            return reply(conn, e.code()).await;
        }
    };

    let keys = match KeyPair::generate_with_config(&context.crypto) {
        Ok(keys) => keys,
        Err(e) => {
            error!("Key generation failed: {}", e);
            return reply(conn, ErrorCode::Internal).await;
        }
    };

    let record = context.registry.add_router(registration.address, keys).await;

    if let Err(e) = context.store.record_router(&record).await {
        warn!("Store rejected router {}: {}", record.id, e);
        context.registry.remove_router(record.id).await;
        return reply(conn, ErrorCode::StoreUnavailable).await;
    }

    reply(
        conn,
        Reply::RouterGranted(RouterGrant {
            id: record.id,
            private_key: record.private_key,
        }),
    )
    .await?;

    info!("Router {} registered at {}", record.id, record.address);
    Ok(())
}

async fn unregister_router(context: &MasterContext, conn: &mut Connection) -> Result<(), ConnectionError> {
    let Some(body) = conn.recv_timeout(context.registration_timeout).await? else {
        return Ok(());
    };

    let Ok(id) = body.trim().parse::<RouterId>() else {
        return reply(conn, ErrorCode::InvalidFormat).await;
    };

    match context.registry.remove_router(id).await {
        Some(record) => {
            if let Err(e) = context.store.remove_router(id).await {
                warn!("Store failed to drop router {}: {}", id, e);
            }
            info!("Router {} at {} unregistered", id, record.address);
            reply(conn, Reply::Ok).await
        }
        None => reply(conn, ErrorCode::RouterNotFound).await,
    }
}

async fn serve_client(context: &MasterContext, conn: &mut Connection) -> Result<(), ConnectionError> {
    let Some(body) = conn.recv_timeout(context.registration_timeout).await? else {
        return Ok(());
    };

    let registration = match ClientRegistration::from_wire(&body) {
        Ok(registration) => registration,
        Err(e) => {
            warn!("Client registration rejected: {}", e);
            return reply(conn, e.code()).await;
        }
    };

    // Private half is discarded
    let keys = match KeyPair::generate_with_config(&context.crypto) {
        Ok(keys) => keys,
        Err(e) => {
            error!("Key generation failed: {}", e);
            return reply(conn, ErrorCode::Internal).await;
        }
    };

    let user = context
        .registry
        .add_or_update_user(&registration.username, registration.address, keys.public)
        .await;

    if let Err(e) = context
        .store
        .record_user(&user.username, &user.address, &user.public_key)
        .await
    {
        warn!("Store rejected user '{}': {}", user.username, e);
        context
            .registry
            .remove_user_session(&user.username, user.session)
            .await;
        return reply(conn, ErrorCode::StoreUnavailable).await;
    }

    let result = match reply(conn, Reply::Registered(keys.public)).await {
        Ok(()) => {
            info!("User '{}' registered at {}", user.username, user.address);
            command_loop(context, conn, &user).await
        }
        Err(e) => Err(e),
    };

    // Only the session that still owns the record may evict it
    if context
        .registry
        .remove_user_session(&user.username, user.session)
        .await
        .is_some()
    {
        if let Err(e) = context.store.mark_user_offline(&user.username).await {
            warn!("Store failed to mark '{}' offline: {}", user.username, e);
        }
        info!("User '{}' cleaned up", user.username);
    } else {
        debug!("User '{}' session {} was superseded", user.username, user.session);
    }

    result
}

async fn command_loop(
    context: &MasterContext,
    conn: &mut Connection,
    user: &UserRecord,
) -> Result<(), ConnectionError> {
    loop {
        let Some(frame) = conn.recv().await? else {
            info!("User '{}' disconnected", user.username);
            return Ok(());
        };

        let command = match frame.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                debug!("Bad command from '{}': {}", user.username, e);
                reply(conn, e.code()).await?;
                continue;
            }
        };

        debug!("{} from '{}'", command.name(), user.username);

        if command == Command::Quit {
            info!("User '{}' quit", user.username);
            return Ok(());
        }

        let response = execute(context, &user.username, command).await;
        reply(conn, response).await?;
    }
}

async fn execute(context: &MasterContext, username: &str, command: Command) -> Reply {
    match command {
        Command::List => Reply::Online(context.registry.list_usernames(Some(username)).await),

        Command::Get(target) => match context.registry.lookup_user(&target).await {
            Some(record) => Reply::User {
                address: record.address,
                public_key: record.public_key,
            },
            None => Reply::NotFound,
        },

        Command::Path {
            sender,
            hops,
            target,
        } => match context.builder.request_circuit(&sender, hops, &target).await {
            Ok(circuit) => {
                info!(
                    "Path created: {} -> {} ({} hops)",
                    sender,
                    target,
                    circuit.length()
                );
                Reply::Path(circuit)
            }
            Err(e) => {
                debug!("Path {} -> {} refused: {}", sender, target, e);
                Reply::Error(ErrorCode::from(&e))
            }
        },

        Command::Ping => Reply::Pong,

        Command::Quit => Reply::Ok,
    }
}

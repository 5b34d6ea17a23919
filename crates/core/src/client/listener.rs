use super::{InboundMessage, MessageHandler};
use crate::circuit::split_payload;
use crate::protocol::{Connection, ConnectionError};
use onionnet_common::Timestamp;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept deliveries until `running` turns false. Per-connection failures
/// never stop the loop.
pub(super) async fn serve(
    listener: TcpListener,
    mut running: watch::Receiver<bool>,
    handler: MessageHandler,
    read_timeout: Duration,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = receive(stream, addr, handler, read_timeout).await {
                            warn!("Delivery from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Listener accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow() {
                    break;
                }
            }
        }
    }

    info!("Message listener stopped");
}

async fn receive(
    stream: TcpStream,
    addr: SocketAddr,
    handler: MessageHandler,
    read_timeout: Duration,
) -> Result<(), ConnectionError> {
    let mut conn = Connection::new(stream)?;
    let Some(payload) = conn.recv_timeout(read_timeout).await? else {
        debug!("{} closed without sending", addr);
        return Ok(());
    };

    match split_payload(&payload) {
        Some((sender, body)) => handler(InboundMessage {
            sender: sender.to_string(),
            body: body.to_string(),
            received_at: Timestamp::now(),
        }),
        None => warn!("Dropping delivery without sender from {}", addr),
    }

    Ok(())
}

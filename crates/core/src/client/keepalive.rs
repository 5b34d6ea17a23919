use super::{DisconnectHandler, DisconnectReason};
use crate::protocol::{Command, Connection, Reply};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// State shared between the agent and its background tasks
pub(super) struct Session {
    /// Registration connection; `None` once stopped or lost
    pub conn: Mutex<Option<Connection>>,
    pub running: watch::Sender<bool>,
    disconnected: AtomicBool,
    on_disconnect: DisconnectHandler,
}

impl Session {
    pub fn new(conn: Connection, on_disconnect: DisconnectHandler) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            conn: Mutex::new(Some(conn)),
            running,
            disconnected: AtomicBool::new(false),
            on_disconnect,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Voluntary shutdown; the disconnect callback is suppressed
    pub fn stop(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.running.send_replace(false);
    }

    /// Involuntary shutdown; the callback fires at most once per session
    pub fn lost(&self, reason: DisconnectReason) {
        self.running.send_replace(false);
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            warn!("Session lost: {}", reason);
            (self.on_disconnect)(reason);
        }
    }
}

/// Send `PING` every `interval`; anything but `PONG` ends the session
pub(super) async fn run(session: std::sync::Arc<Session>, interval: Duration, reply_timeout: Duration) {
    let mut running = session.running.subscribe();
    let ping = Command::Ping.to_wire();
    let pong = Reply::Pong.to_string();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = running.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if !*running.borrow() {
            break;
        }

        let result = {
            let mut guard = session.conn.lock().await;
            match guard.as_mut() {
                Some(conn) => conn.request(&ping, reply_timeout).await,
                None => break,
            }
        };

        let reason = match result {
            Ok(reply) if reply == pong => {
                debug!("Keep-alive ok");
                continue;
            }
            Ok(reply) => DisconnectReason::UnexpectedReply(reply),
            Err(e) => DisconnectReason::Transport(e.to_string()),
        };

        session.conn.lock().await.take();
        session.lost(reason);
        break;
    }

    debug!("Keep-alive stopped");
}

//! Host hooks for connection events.

use crate::protocol::Envelope;
use chrono::{DateTime, Utc};
use pixsync_core::ClientId;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, info};

/// What the host learns about a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

impl ClientInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: ClientId::new(),
            addr,
            connected_at: Utc::now(),
        }
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Informational hooks, called on the network thread.
///
/// Implementations must not block. A panicking hook is logged and ignored.
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self, _client: &ClientInfo) {}

    fn on_disconnected(&self, _client: &ClientInfo) {}

    fn on_message(&self, _client: &ClientInfo, _message: &Envelope) {}
}

/// Default observer: logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ConnectionObserver for LoggingObserver {
    fn on_connected(&self, client: &ClientInfo) {
        info!("Client connected: {}", client);
    }

    fn on_disconnected(&self, client: &ClientInfo) {
        info!("Client disconnected: {}", client);
    }

    fn on_message(&self, client: &ClientInfo, message: &Envelope) {
        info!("Message from {}: {}", client, message.kind);
    }
}

/// Runs a hook, containing any panic it raises.
pub(crate) fn isolate(hook: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("Connection observer panicked in {}", hook);
    }
}

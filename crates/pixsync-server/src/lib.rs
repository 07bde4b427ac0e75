//! Pixsync Server - WebSocket broadcast server for the pixsync protocol
//!
//! This crate implements the network side of the bridge between a host
//! application and external pixel-art tools.
//!
//! The server supports:
//! - A dedicated network thread with an idempotent start/stop lifecycle
//! - Multiple concurrent connections with keepalive pings
//! - Best-effort broadcasts that prune dead peers
//! - Routing of peer requests into owner-thread mailboxes

mod clients;
mod error;
mod handlers;
mod observer;
pub mod protocol;
mod server;

pub use clients::DeliveryReport;
pub use error::ServerError;
pub use observer::{ClientInfo, ConnectionObserver, LoggingObserver};
pub use protocol::{Envelope, Inbound, SyncTexture, UNSOLICITED};
pub use server::{
    BroadcastOutcome, BroadcastServer, Broadcaster, Delivery, ServerConfig, ServerState,
    ServerStatus, StartOutcome, StopOutcome,
};

//! Pixsync Watcher - owner-thread ticks for the pixsync bridge
//!
//! Provides the polling side of the bridge:
//! - [`ChangeWatcher`] fingerprints a slice of host state and pushes it on change
//! - [`DrainLoop`] applies queued mutations and answers inventory pulls
//! - [`Bridge`] wires a server, queue, watchers and drain loop together and
//!   registers them with the host's scheduler
//!
//! # Example
//!
//! ```no_run
//! use pixsync_core::memory::MemoryHost;
//! use pixsync_core::TickScheduler;
//! use pixsync_server::{LoggingObserver, ServerConfig};
//! use pixsync_watcher::{Bridge, BridgeConfig};
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let host = Rc::new(MemoryHost::new());
//! let mut bridge = Bridge::new(
//!     BridgeConfig::default(),
//!     ServerConfig::default(),
//!     host,
//!     Arc::new(LoggingObserver),
//! );
//! let mut scheduler = TickScheduler::new();
//!
//! bridge.start().unwrap();
//! bridge.attach(&mut scheduler).unwrap();
//! scheduler.run_for(Duration::from_secs(60));
//! bridge.shutdown(&mut scheduler).unwrap();
//! ```

mod bridge;
mod drain;
mod error;
mod fingerprint;
mod watcher;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeConfig};
pub use drain::{DrainLoop, DrainReport};
pub use error::BridgeError;
pub use fingerprint::Fingerprint;
pub use watcher::{
    AttachPolicy, ChangeWatcher, InventorySlice, TickOutcome, UvOverlaySlice, WatchedSlice,
};

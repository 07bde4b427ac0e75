//! Pixsync Core - the owner-thread side of the bridge
//!
//! This crate holds everything that sits between the host application's
//! in-memory scene and the network side of pixsync:
//!
//! - The [`Host`] interface through which resources are read and mutated
//! - The update mailbox that lets any thread request a host mutation
//! - Owner-thread affinity checks and the scoped mutation lock
//! - The periodic scheduler contract that drives owner-thread ticks
//!
//! # Example
//!
//! ```no_run
//! use pixsync_core::{mailbox, collapse_latest, Payload, UpdateRequest};
//!
//! let (queue, mut inbox) = mailbox::<UpdateRequest>();
//! queue.push(UpdateRequest::new("sprite.png", Payload::path("/tmp/a.png")));
//! queue.push(UpdateRequest::new("sprite.png", Payload::path("/tmp/b.png")));
//!
//! let collapsed = collapse_latest(inbox.take_all());
//! assert_eq!(collapsed.requests.len(), 1);
//! ```

mod affinity;
mod error;
mod host;
mod lock;
pub mod memory;
mod queue;
mod scheduler;

pub use affinity::OwnerThread;
pub use error::{CoreError, HostError, SchedulerError};
pub use host::{
    ApplyHints, Host, MeshUv, Payload, ResourceEntry, ResourceInfo, ResourceKind, UvLayout,
};
pub use lock::{MutationGuard, MutationLock};
pub use queue::{
    collapse_latest, mailbox, ClientId, Collapsed, InventoryPull, MailboxReceiver, MailboxSender,
    Origin, UpdateMetadata, UpdateQueue, UpdateRequest,
};
pub use scheduler::{Scheduler, TickScheduler, TimerCallback, TimerId};

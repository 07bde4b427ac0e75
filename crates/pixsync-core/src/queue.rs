//! Cross-thread mailboxes destined for the owner thread.
//!
//! Any thread may push; only the owner thread drains. Pushing never blocks
//! and the mailbox is unbounded, so the network thread can hand work over
//! without ever waiting on the host.

use crate::host::{ApplyHints, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Identity of one live peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who asked for a piece of work, so the answer can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub client: ClientId,
    pub request_id: i64,
}

/// Extra information carried alongside an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateMetadata {
    pub hints: ApplyHints,
    /// Set when the update came from a peer request.
    pub origin: Option<Origin>,
}

/// A pending request to mutate one host resource.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub resource_key: String,
    pub payload: Payload,
    pub metadata: UpdateMetadata,
    pub enqueued_at: DateTime<Utc>,
}

impl UpdateRequest {
    pub fn new(resource_key: impl Into<String>, payload: Payload) -> Self {
        Self {
            resource_key: resource_key.into(),
            payload,
            metadata: UpdateMetadata::default(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_hints(mut self, hints: ApplyHints) -> Self {
        self.metadata.hints = hints;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.metadata.origin = Some(origin);
        self
    }
}

/// A peer asked for the current inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryPull {
    pub origin: Origin,
}

/// Creates an unbounded mailbox.
pub fn mailbox<T>() -> (MailboxSender<T>, MailboxReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MailboxSender { tx }, MailboxReceiver { rx })
}

/// Cloneable, thread-safe producer side of a mailbox.
#[derive(Debug)]
pub struct MailboxSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MailboxSender<T> {
    /// Appends `item`. Returns `false` if the owner side is gone.
    pub fn push(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner-thread side of a mailbox.
#[derive(Debug)]
pub struct MailboxReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> MailboxReceiver<T> {
    /// Pulls everything queued so far without waiting.
    pub fn take_all(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }
}

/// Producer handle for host mutations.
pub type UpdateQueue = MailboxSender<UpdateRequest>;

/// Requests left after collapsing a batch by resource key.
#[derive(Debug, Default)]
pub struct Collapsed {
    /// The latest request per key, in first-seen key order.
    pub requests: Vec<UpdateRequest>,
    /// Requests dropped because a later one targeted the same key.
    pub superseded: Vec<UpdateRequest>,
}

/// Keeps only the last-enqueued request for every resource key.
pub fn collapse_latest(batch: Vec<UpdateRequest>) -> Collapsed {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut collapsed = Collapsed::default();

    for request in batch {
        match slots.get(&request.resource_key) {
            Some(&slot) => {
                let older = std::mem::replace(&mut collapsed.requests[slot], request);
                debug!("Superseded pending update for {}", older.resource_key);
                collapsed.superseded.push(older);
            }
            None => {
                slots.insert(request.resource_key.clone(), collapsed.requests.len());
                collapsed.requests.push(request);
            }
        }
    }

    collapsed
}

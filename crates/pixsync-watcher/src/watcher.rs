//! Polling change watchers.
//!
//! A watcher fingerprints one slice of host state every tick and pushes the
//! full slice to peers when the fingerprint moves. Ticks run on the owner
//! thread; broadcasting is handed to the server without blocking.

use crate::fingerprint::Fingerprint;
use pixsync_core::{CoreError, Host, MutationLock, OwnerThread};
use pixsync_server::protocol::{inventory_message, uv_overlay_message};
use pixsync_server::{BroadcastOutcome, Broadcaster, Envelope, UNSOLICITED};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};

/// What a watcher does about changes seen while nobody is connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachPolicy {
    /// The change is absorbed; a client attaching later hears nothing until
    /// the next change.
    #[default]
    Silent,
    /// The change is pushed once as soon as a client is present.
    AnnounceMissed,
}

/// A slice of host state a watcher can digest and serialize.
pub trait WatchedSlice {
    /// Name used in logs and timer registration.
    fn name(&self) -> &'static str;

    fn fingerprint(&self, host: &dyn Host) -> Fingerprint;

    /// The push sent to peers when the slice changed.
    fn payload(&self, host: &dyn Host) -> Envelope;
}

/// The resource inventory, pushed as an unsolicited `GET_IMAGES`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventorySlice;

impl WatchedSlice for InventorySlice {
    fn name(&self) -> &'static str {
        "inventory_watcher"
    }

    fn fingerprint(&self, host: &dyn Host) -> Fingerprint {
        Fingerprint::of_inventory(&host.read_inventory())
    }

    fn payload(&self, host: &dyn Host) -> Envelope {
        inventory_message(&host.read_inventory(), UNSOLICITED)
    }
}

/// The visible UV layout, pushed as `GET_UV_OVERLAY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UvOverlaySlice;

impl WatchedSlice for UvOverlaySlice {
    fn name(&self) -> &'static str {
        "uv_watcher"
    }

    fn fingerprint(&self, host: &dyn Host) -> Fingerprint {
        Fingerprint::of_uv_layout(&host.uv_layout())
    }

    fn payload(&self, host: &dyn Host) -> Envelope {
        uv_overlay_message(&host.uv_layout())
    }
}

/// Result of a single watcher tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Unchanged,
    /// Changed, but nobody was listening.
    Absorbed,
    Pushed,
}

/// Owner-thread polling watcher over one [`WatchedSlice`].
pub struct ChangeWatcher<S, B> {
    slice: S,
    host: Rc<dyn Host>,
    broadcaster: B,
    lock: MutationLock,
    owner: OwnerThread,
    interval: Duration,
    policy: AttachPolicy,
    last_fingerprint: Option<Fingerprint>,
    missed: bool,
}

impl<S: WatchedSlice, B: Broadcaster> ChangeWatcher<S, B> {
    /// Creates a watcher owned by the calling thread.
    pub fn new(slice: S, host: Rc<dyn Host>, broadcaster: B, lock: MutationLock) -> Self {
        Self {
            slice,
            host,
            broadcaster,
            lock,
            owner: OwnerThread::current(),
            interval: Duration::from_millis(500),
            policy: AttachPolicy::default(),
            last_fingerprint: None,
            missed: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: AttachPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_owner(mut self, owner: OwnerThread) -> Self {
        self.owner = owner;
        self
    }

    pub fn name(&self) -> &'static str {
        self.slice.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.last_fingerprint
    }

    /// Scheduler entry point: checks once and returns the next delay.
    pub fn tick(&mut self) -> Result<Duration, CoreError> {
        self.check()?;
        Ok(self.interval)
    }

    /// Fingerprints the slice and pushes it if it changed and someone is
    /// listening.
    pub fn check(&mut self) -> Result<TickOutcome, CoreError> {
        self.owner.check(self.slice.name())?;

        let status = self.broadcaster.status();
        let has_audience = status.running && status.client_count > 0;

        let (fingerprint, changed, payload) = {
            let _guard = self.lock.acquire();
            let fingerprint = self.slice.fingerprint(self.host.as_ref());
            let changed = self.last_fingerprint != Some(fingerprint);
            let announce_missed = self.policy == AttachPolicy::AnnounceMissed && self.missed;

            let payload = if (changed || announce_missed) && has_audience {
                Some(self.slice.payload(self.host.as_ref()))
            } else {
                None
            };
            (fingerprint, changed, payload)
        };

        self.last_fingerprint = Some(fingerprint);

        let Some(payload) = payload else {
            if changed {
                debug!(
                    "{}: change {} absorbed, no clients attached",
                    self.slice.name(),
                    fingerprint
                );
                self.missed = true;
                return Ok(TickOutcome::Absorbed);
            }
            return Ok(TickOutcome::Unchanged);
        };

        match self.broadcaster.broadcast(&payload) {
            BroadcastOutcome::Dispatched(_) => {
                info!(
                    "{}: pushed {} to {} client(s)",
                    self.slice.name(),
                    payload.kind,
                    status.client_count
                );
                self.missed = false;
                Ok(TickOutcome::Pushed)
            }
            BroadcastOutcome::NoAudience => {
                debug!("{}: audience left before push", self.slice.name());
                self.missed = true;
                Ok(TickOutcome::Absorbed)
            }
        }
    }
}

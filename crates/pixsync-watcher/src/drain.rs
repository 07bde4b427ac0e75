//! The owner-thread drain loop.
//!
//! Applies queued mutations through the [`Host`] and answers requests that
//! need host state, such as inventory pulls.

use pixsync_core::{
    collapse_latest, CoreError, Host, HostError, InventoryPull, MailboxReceiver, MutationLock,
    Origin, OwnerThread, ResourceInfo, UpdateRequest,
};
use pixsync_server::protocol::{inventory_message, sync_texture_failed, sync_texture_ok};
use pixsync_server::{BroadcastOutcome, Broadcaster, Envelope};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one drain cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub failed: usize,
    /// Older requests dropped in favor of a later one for the same key.
    pub superseded: usize,
    pub pulls_answered: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct DrainLoop<B> {
    updates: MailboxReceiver<UpdateRequest>,
    pulls: MailboxReceiver<InventoryPull>,
    host: Rc<dyn Host>,
    broadcaster: B,
    lock: MutationLock,
    owner: OwnerThread,
    interval: Duration,
}

impl<B: Broadcaster> DrainLoop<B> {
    /// Creates a drain loop owned by the calling thread.
    pub fn new(
        updates: MailboxReceiver<UpdateRequest>,
        pulls: MailboxReceiver<InventoryPull>,
        host: Rc<dyn Host>,
        broadcaster: B,
        lock: MutationLock,
    ) -> Self {
        Self {
            updates,
            pulls,
            host,
            broadcaster,
            lock,
            owner: OwnerThread::current(),
            interval: Duration::from_millis(100),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_owner(mut self, owner: OwnerThread) -> Self {
        self.owner = owner;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Scheduler entry point.
    pub fn tick(&mut self) -> Result<Duration, CoreError> {
        self.drain_and_apply()?;
        Ok(self.interval)
    }

    /// Applies the latest queued request per key, then answers pending
    /// inventory pulls.
    ///
    /// A failure for one key is logged and reported back to the requesting
    /// peer; the other keys are still applied.
    pub fn drain_and_apply(&mut self) -> Result<DrainReport, CoreError> {
        self.owner.check("drain_and_apply")?;

        let mut report = DrainReport::default();
        let batch = self.updates.take_all();

        if !batch.is_empty() {
            let collapsed = collapse_latest(batch);
            report.superseded = collapsed.superseded.len();

            for request in collapsed.requests {
                let key = request.resource_key.as_str();
                let result = self.apply(&request);

                let response = match &result {
                    Ok(info) => {
                        report.applied += 1;
                        info!("Applied update to {} ({}x{})", key, info.size[0], info.size[1]);
                        request
                            .metadata
                            .origin
                            .map(|origin| (origin, sync_texture_ok(info, origin.request_id)))
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!("Failed to apply update to {}: {}", key, e);
                        request.metadata.origin.map(|origin| {
                            (
                                origin,
                                sync_texture_failed(key, &e.to_string(), origin.request_id),
                            )
                        })
                    }
                };

                if let Some((origin, message)) = response {
                    self.respond(origin, &message);
                }
            }
        }

        let pulls = self.pulls.take_all();
        if !pulls.is_empty() {
            let entries = {
                let _guard = self.lock.acquire();
                self.host.read_inventory()
            };
            for pull in pulls {
                let message = inventory_message(&entries, pull.origin.request_id);
                if self.respond(pull.origin, &message) {
                    report.pulls_answered += 1;
                }
            }
        }

        if !report.is_idle() {
            debug!("Drain cycle: {:?}", report);
        }
        Ok(report)
    }

    fn apply(&self, request: &UpdateRequest) -> Result<ResourceInfo, HostError> {
        let _guard = self.lock.acquire();
        let host = &self.host;

        panic::catch_unwind(AssertUnwindSafe(|| {
            host.apply(
                &request.resource_key,
                &request.payload,
                &request.metadata.hints,
            )
        }))
        .unwrap_or_else(|_| {
            Err(HostError::Rejected {
                key: request.resource_key.clone(),
                reason: "host panicked while applying".into(),
            })
        })
    }

    fn respond(&self, origin: Origin, message: &Envelope) -> bool {
        match self.broadcaster.send_to(origin.client, message) {
            BroadcastOutcome::Dispatched(_) => true,
            BroadcastOutcome::NoAudience => {
                debug!(
                    "Client {} is gone, dropping {} #{}",
                    origin.client, message.kind, origin.request_id
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SpyBroadcaster;
    use pixsync_core::memory::MemoryHost;
    use pixsync_core::{mailbox, ApplyHints, ClientId, Payload, UpdateQueue};
    use pixsync_core::{MailboxSender, ResourceEntry};
    use std::thread;

    struct Fixture {
        queue: UpdateQueue,
        pulls: MailboxSender<InventoryPull>,
        host: Rc<MemoryHost>,
        spy: SpyBroadcaster,
        drain: DrainLoop<SpyBroadcaster>,
    }

    fn fixture() -> Fixture {
        let (queue, updates) = mailbox();
        let (pulls, pull_rx) = mailbox();
        let host = Rc::new(MemoryHost::new());
        let spy = SpyBroadcaster::with_clients(1);
        let drain = DrainLoop::new(updates, pull_rx, host.clone(), spy.clone(), MutationLock::new());
        Fixture {
            queue,
            pulls,
            host,
            spy,
            drain,
        }
    }

    fn origin(request_id: i64) -> Origin {
        Origin {
            client: ClientId::new(),
            request_id,
        }
    }

    #[test]
    fn test_latest_payload_per_key_is_applied_once() {
        let mut f = fixture();
        for file in ["A", "B", "C"] {
            f.queue.push(UpdateRequest::new("K", Payload::path(file)));
        }

        let report = f.drain.drain_and_apply().unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.superseded, 2);
        assert_eq!(f.host.applied(), vec![("K".to_string(), Payload::path("C"))]);
    }

    #[test]
    fn test_failure_is_isolated_per_key() {
        let mut f = fixture();
        f.host.reject_key("bad.png");
        f.queue.push(UpdateRequest::new("bad.png", Payload::path("/tmp/x.png")));
        f.queue.push(UpdateRequest::new("good.png", Payload::path("/tmp/y.png")));

        let report = f.drain.drain_and_apply().unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);
        let applied: Vec<_> = f.host.applied().into_iter().map(|(k, _)| k).collect();
        assert_eq!(applied, vec!["good.png"]);
    }

    #[test]
    fn test_origin_receives_correlated_response() {
        let mut f = fixture();
        let ok = origin(7);
        let failed = origin(8);
        f.host.reject_key("bad.png");
        f.queue.push(
            UpdateRequest::new("sprite.png", Payload::path("/tmp/s.png"))
                .with_hints(ApplyHints {
                    project_size: Some([32, 32]),
                })
                .with_origin(ok),
        );
        f.queue
            .push(UpdateRequest::new("bad.png", Payload::path("/tmp/b.png")).with_origin(failed));

        f.drain.drain_and_apply().unwrap();

        let directed = f.spy.directed();
        assert_eq!(directed.len(), 2);

        let (client, message) = &directed[0];
        assert_eq!(*client, ok.client);
        assert_eq!(message.kind, "SYNC_TEXTURE_RESPONSE");
        assert_eq!(message.request_id, 7);
        assert_eq!(message.data["success"], true);
        assert_eq!(message.data["size"], serde_json::json!([32, 32]));

        let (client, message) = &directed[1];
        assert_eq!(*client, failed.client);
        assert_eq!(message.request_id, 8);
        assert_eq!(message.data["success"], false);
    }

    #[test]
    fn test_superseded_request_gets_no_response() {
        let mut f = fixture();
        f.queue
            .push(UpdateRequest::new("K", Payload::path("A")).with_origin(origin(1)));
        f.queue
            .push(UpdateRequest::new("K", Payload::path("B")).with_origin(origin(2)));

        f.drain.drain_and_apply().unwrap();

        let directed = f.spy.directed();
        assert_eq!(directed.len(), 1);
        assert_eq!(directed[0].1.request_id, 2);
    }

    #[test]
    fn test_inventory_pull_is_answered_with_same_request_id() {
        let mut f = fixture();
        f.host
            .insert(ResourceEntry::image("a.png", "/art/a.png", [16, 16]));
        let pull = InventoryPull { origin: origin(7) };
        f.pulls.push(pull);

        let report = f.drain.drain_and_apply().unwrap();

        assert_eq!(report.pulls_answered, 1);
        let directed = f.spy.directed();
        assert_eq!(directed[0].0, pull.origin.client);
        assert_eq!(directed[0].1.kind, "GET_IMAGES");
        assert_eq!(directed[0].1.request_id, 7);
        assert_eq!(directed[0].1.data[0]["name"], "a.png");
    }

    #[test]
    fn test_empty_drain_is_idle() {
        let mut f = fixture();
        let report = f.drain.drain_and_apply().unwrap();
        assert!(report.is_idle());
        assert_eq!(f.drain.tick().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_drain_off_owner_thread_fails_loudly() {
        let f = fixture();
        let elsewhere = thread::spawn(OwnerThread::current).join().unwrap();
        let mut drain = f.drain.with_owner(elsewhere);
        f.queue.push(UpdateRequest::new("K", Payload::path("A")));

        let err = drain.drain_and_apply().unwrap_err();
        assert!(matches!(err, CoreError::WrongThread { operation: "drain_and_apply", .. }));
        assert!(f.host.applied().is_empty());
    }

    struct PanickyHost;

    impl Host for PanickyHost {
        fn apply(
            &self,
            key: &str,
            _payload: &Payload,
            _hints: &ApplyHints,
        ) -> Result<ResourceInfo, HostError> {
            if key == "boom" {
                panic!("host exploded");
            }
            Ok(ResourceInfo {
                key: key.to_string(),
                size: [1, 1],
                packed: true,
            })
        }

        fn read_inventory(&self) -> Vec<ResourceEntry> {
            Vec::new()
        }
    }

    #[test]
    fn test_host_panic_does_not_abort_batch() {
        let (queue, updates) = mailbox();
        let (_pulls, pull_rx) = mailbox();
        let lock = MutationLock::new();
        let mut drain = DrainLoop::new(
            updates,
            pull_rx,
            Rc::new(PanickyHost),
            SpyBroadcaster::with_clients(0),
            lock.clone(),
        );
        queue.push(UpdateRequest::new("boom", Payload::path("a")));
        queue.push(UpdateRequest::new("fine", Payload::path("b")));

        let report = drain.drain_and_apply().unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);
        assert!(!lock.is_held());
    }
}

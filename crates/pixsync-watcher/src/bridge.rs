//! The bridge context object.
//!
//! [`Bridge`] owns one broadcast server, one update queue, the two change
//! watchers and the drain loop, and registers their ticks with the host's
//! [`Scheduler`]. Several bridges can coexist in one process (on different
//! ports), which is how the tests use it.

use crate::drain::{DrainLoop, DrainReport};
use crate::error::BridgeError;
use crate::watcher::{AttachPolicy, ChangeWatcher, InventorySlice, UvOverlaySlice};
use pixsync_core::{
    mailbox, CoreError, Host, MutationLock, OwnerThread, Scheduler, SchedulerError, TimerId,
    UpdateQueue,
};
use pixsync_server::{
    BroadcastServer, Broadcaster, ConnectionObserver, ServerConfig, ServerStatus, StartOutcome,
    StopOutcome,
};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Tick cadence and notification policy.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub uv_interval: Duration,
    pub inventory_interval: Duration,
    pub drain_interval: Duration,
    pub attach_policy: AttachPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            uv_interval: Duration::from_millis(500),
            inventory_interval: Duration::from_millis(500),
            drain_interval: Duration::from_millis(100),
            attach_policy: AttachPolicy::Silent,
        }
    }
}

type Shared<T> = Rc<RefCell<T>>;

pub struct Bridge {
    config: BridgeConfig,
    server: BroadcastServer,
    queue: UpdateQueue,
    owner: OwnerThread,
    uv: Shared<ChangeWatcher<UvOverlaySlice, BroadcastServer>>,
    inventory: Shared<ChangeWatcher<InventorySlice, BroadcastServer>>,
    drain: Shared<DrainLoop<BroadcastServer>>,
    timers: Vec<TimerId>,
}

impl Bridge {
    /// Builds a stopped bridge owned by the calling thread.
    pub fn new<H: Host + 'static>(
        config: BridgeConfig,
        server_config: ServerConfig,
        host: Rc<H>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let owner = OwnerThread::current();
        let lock = MutationLock::new();
        let host: Rc<dyn Host> = host;

        let (queue, updates) = mailbox();
        let (pulls, pull_rx) = mailbox();
        let server = BroadcastServer::new(server_config, queue.clone(), pulls, observer);

        let uv = ChangeWatcher::new(UvOverlaySlice, host.clone(), server.clone(), lock.clone())
            .with_interval(config.uv_interval)
            .with_policy(config.attach_policy)
            .with_owner(owner);
        let inventory =
            ChangeWatcher::new(InventorySlice, host.clone(), server.clone(), lock.clone())
                .with_interval(config.inventory_interval)
                .with_policy(config.attach_policy)
                .with_owner(owner);
        let drain = DrainLoop::new(updates, pull_rx, host, server.clone(), lock)
            .with_interval(config.drain_interval)
            .with_owner(owner);

        Self {
            config,
            server,
            queue,
            owner,
            uv: Rc::new(RefCell::new(uv)),
            inventory: Rc::new(RefCell::new(inventory)),
            drain: Rc::new(RefCell::new(drain)),
            timers: Vec::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// A handle any thread can use to request host mutations.
    pub fn queue(&self) -> UpdateQueue {
        self.queue.clone()
    }

    pub fn server(&self) -> &BroadcastServer {
        &self.server
    }

    pub fn status(&self) -> ServerStatus {
        self.server.status()
    }

    pub fn is_attached(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn start(&self) -> Result<StartOutcome, BridgeError> {
        Ok(self.server.start()?)
    }

    pub fn stop(&self) -> Result<StopOutcome, BridgeError> {
        Ok(self.server.stop()?)
    }

    /// Runs one drain cycle right away, outside the scheduler.
    pub fn drain_now(&self) -> Result<DrainReport, CoreError> {
        self.drain.borrow_mut().drain_and_apply()
    }

    /// Registers the UV watcher, inventory watcher and drain ticks.
    pub fn attach(&mut self, scheduler: &mut dyn Scheduler) -> Result<(), BridgeError> {
        self.owner.check("attach")?;
        if self.is_attached() {
            return Err(BridgeError::AlreadyAttached);
        }

        let uv = Rc::clone(&self.uv);
        let interval = self.config.uv_interval;
        self.timers.push(scheduler.register(
            "uv_watcher",
            interval,
            Box::new(move || guarded("uv_watcher", interval, || uv.borrow_mut().tick())),
        ));

        let inventory = Rc::clone(&self.inventory);
        let interval = self.config.inventory_interval;
        self.timers.push(scheduler.register(
            "inventory_watcher",
            interval,
            Box::new(move || {
                guarded("inventory_watcher", interval, || inventory.borrow_mut().tick())
            }),
        ));

        let drain = Rc::clone(&self.drain);
        let interval = self.config.drain_interval;
        self.timers.push(scheduler.register(
            "drain",
            interval,
            Box::new(move || guarded("drain", interval, || drain.borrow_mut().tick())),
        ));

        info!("Bridge attached ({} timers)", self.timers.len());
        Ok(())
    }

    /// Unregisters every tick. Timers the scheduler already dropped are
    /// skipped.
    pub fn detach(&mut self, scheduler: &mut dyn Scheduler) {
        for id in self.timers.drain(..) {
            match scheduler.unregister(id) {
                Ok(()) => debug!("Unregistered timer {}", id),
                Err(SchedulerError::NotRegistered(id)) => {
                    debug!("Timer {} was not registered, skipping", id)
                }
            }
        }
    }

    /// Detaches from the scheduler and stops the server.
    pub fn shutdown(&mut self, scheduler: &mut dyn Scheduler) -> Result<StopOutcome, BridgeError> {
        self.detach(scheduler);
        self.stop()
    }
}

/// Runs one tick, keeping panics and misuse away from the scheduler.
fn guarded(
    name: &'static str,
    interval: Duration,
    tick: impl FnOnce() -> Result<Duration, CoreError>,
) -> Option<Duration> {
    match panic::catch_unwind(AssertUnwindSafe(tick)) {
        Ok(Ok(next)) => Some(next),
        Ok(Err(e)) => {
            error!("{} stopped: {}", name, e);
            None
        }
        Err(_) => {
            error!("{} panicked, will retry next tick", name);
            Some(interval)
        }
    }
}

use pixsync_core::ClientId;
use pixsync_server::{
    BroadcastOutcome, Broadcaster, Delivery, DeliveryReport, Envelope, ServerState, ServerStatus,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Records outbound messages instead of sending them.
#[derive(Clone, Default)]
pub struct SpyBroadcaster {
    running: Rc<Cell<bool>>,
    clients: Rc<Cell<usize>>,
    calls: Rc<Cell<usize>>,
    drop_next: Rc<Cell<bool>>,
    sent: Rc<RefCell<Vec<Envelope>>>,
    directed: Rc<RefCell<Vec<(ClientId, Envelope)>>>,
}

impl SpyBroadcaster {
    pub fn with_clients(clients: usize) -> Self {
        let spy = Self::default();
        spy.running.set(true);
        spy.clients.set(clients);
        spy
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn set_clients(&self, clients: usize) {
        self.clients.set(clients);
    }

    /// Makes the next broadcast find nobody, as if the last client left
    /// right after `status` was read.
    pub fn drop_next_broadcast(&self) {
        self.drop_next.set(true);
    }

    /// Every `broadcast` call, delivered or not.
    pub fn broadcast_calls(&self) -> usize {
        self.calls.get()
    }

    pub fn broadcasts(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.borrow().clone()
    }

    pub fn directed(&self) -> Vec<(ClientId, Envelope)> {
        self.directed.borrow().clone()
    }

    fn delivered(&self, count: usize) -> BroadcastOutcome {
        BroadcastOutcome::Dispatched(Delivery::ready(DeliveryReport {
            attempted: count,
            delivered: count,
            pruned: 0,
        }))
    }
}

impl Broadcaster for SpyBroadcaster {
    fn status(&self) -> ServerStatus {
        let running = self.running.get();
        ServerStatus {
            running,
            client_count: if running { self.clients.get() } else { 0 },
            state: if running {
                ServerState::Running
            } else {
                ServerState::Stopped
            },
        }
    }

    fn broadcast(&self, message: &Envelope) -> BroadcastOutcome {
        self.calls.set(self.calls.get() + 1);
        let status = self.status();
        if self.drop_next.replace(false) || !status.running || status.client_count == 0 {
            return BroadcastOutcome::NoAudience;
        }
        self.sent.borrow_mut().push(message.clone());
        self.delivered(status.client_count)
    }

    fn send_to(&self, client: ClientId, message: &Envelope) -> BroadcastOutcome {
        if !self.running.get() {
            return BroadcastOutcome::NoAudience;
        }
        self.directed.borrow_mut().push((client, message.clone()));
        self.delivered(1)
    }
}

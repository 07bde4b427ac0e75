//! Broadcast server implementation.
//!
//! The server owns one network thread running a single-threaded tokio
//! runtime. Everything that touches the live client set happens on that
//! thread; other threads talk to it through a command channel and read
//! status from atomics.

use crate::clients::{fan_out, handle_client, ClientEvent, ClientSet, ConnectionSettings, DeliveryReport};
use crate::error::ServerError;
use crate::handlers::Router;
use crate::observer::{isolate, ConnectionObserver};
use crate::protocol::Envelope;
use parking_lot::Mutex;
use pixsync_core::{ClientId, InventoryPull, MailboxSender, UpdateQueue};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Keepalive ping cadence.
    pub ping_interval: Duration,
    /// How long a peer may take to answer a ping.
    pub pong_timeout: Duration,
    /// Budget for closing peers during shutdown.
    pub close_timeout: Duration,
    /// Budget for a single frame write.
    pub send_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Hard ceiling on how long `stop` waits for the network thread.
    pub stop_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
            send_timeout: Duration::from_secs(5),
            max_message_size: 10_000_000,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            ping_interval: self.ping_interval,
            pong_timeout: self.pong_timeout,
            send_timeout: self.send_timeout,
            close_timeout: self.close_timeout,
            max_message_size: self.max_message_size,
        }
    }
}

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ServerState::Stopped => 0,
            ServerState::Starting => 1,
            ServerState::Running => 2,
            ServerState::Stopping => 3,
        }
    }
}

/// Point-in-time snapshot, readable from any thread without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub client_count: usize,
    pub state: ServerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SocketAddr),
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// Pending result of a broadcast handed to the network thread.
#[derive(Debug)]
pub struct Delivery {
    rx: Receiver<DeliveryReport>,
}

impl Delivery {
    /// A delivery whose outcome is already known.
    pub fn ready(report: DeliveryReport) -> Self {
        let (tx, rx) = sync_channel(1);
        let _ = tx.send(report);
        Self { rx }
    }

    /// Blocks until the network thread reports back, or `timeout` passes.
    ///
    /// Returns `None` on timeout or if the server shut down first.
    pub fn wait(self, timeout: Duration) -> Option<DeliveryReport> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// What happened to an outbound message.
#[derive(Debug)]
pub enum BroadcastOutcome {
    /// Not running, or nobody to send to. Not an error.
    NoAudience,
    Dispatched(Delivery),
}

impl BroadcastOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, BroadcastOutcome::Dispatched(_))
    }
}

/// The thread-safe outbound surface of the server.
pub trait Broadcaster {
    fn status(&self) -> ServerStatus;

    /// Sends `message` to every live client. Never blocks on the network.
    fn broadcast(&self, message: &Envelope) -> BroadcastOutcome;

    /// Sends `message` to one client only.
    fn send_to(&self, client: ClientId, message: &Envelope) -> BroadcastOutcome;
}

enum Command {
    Send {
        frame: Arc<str>,
        target: Option<ClientId>,
        reply: SyncSender<DeliveryReport>,
    },
    Shutdown,
}

struct FanOutDone {
    attempted: usize,
    delivered: usize,
    failed: Vec<ClientId>,
    reply: SyncSender<DeliveryReport>,
}

struct Shared {
    config: ServerConfig,
    state: AtomicU8,
    client_count: Arc<AtomicUsize>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    router: Router,
}

impl Shared {
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

struct Worker {
    thread: JoinHandle<()>,
    exited: Receiver<()>,
    local_addr: SocketAddr,
}

/// Sends on drop, so `stop` learns the network thread is done even if it
/// unwound.
struct ExitSignal(SyncSender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// The pixsync broadcast server.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct BroadcastServer {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl BroadcastServer {
    /// Creates a stopped server that feeds the given owner-thread mailboxes.
    pub fn new(
        config: ServerConfig,
        updates: UpdateQueue,
        pulls: MailboxSender<InventoryPull>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(ServerState::Stopped.as_u8()),
                client_count: Arc::new(AtomicUsize::new(0)),
                commands: Mutex::new(None),
                router: Router::new(updates, pulls, observer),
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.lock().as_ref().map(|w| w.local_addr)
    }

    /// Starts the network thread. Returns once the listener is bound.
    ///
    /// Calling this while running is a no-op. A bind failure leaves the
    /// server stopped.
    pub fn start(&self) -> Result<StartOutcome, ServerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("Server already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.shared.set_state(ServerState::Starting);
        match self.spawn_worker() {
            Ok(spawned) => {
                let addr = spawned.local_addr;
                *worker = Some(spawned);
                self.shared.set_state(ServerState::Running);
                info!("🌐 Server started on ws://{}", addr);
                Ok(StartOutcome::Started(addr))
            }
            Err(e) => {
                *self.shared.commands.lock() = None;
                self.shared.set_state(ServerState::Stopped);
                error!("Server failed to start: {}", e);
                Err(e)
            }
        }
    }

    /// Stops the network thread, closing every client and the listener.
    ///
    /// Waits at most `stop_timeout`. The server ends up stopped either way;
    /// a timeout is reported as an error.
    pub fn stop(&self) -> Result<StopOutcome, ServerError> {
        let mut guard = self.worker.lock();
        let worker = match guard.take() {
            Some(worker) => worker,
            None => {
                debug!("Server already stopped");
                return Ok(StopOutcome::AlreadyStopped);
            }
        };

        self.shared.set_state(ServerState::Stopping);
        info!("Server stopping...");

        if let Some(commands) = self.shared.commands.lock().take() {
            let _ = commands.send(Command::Shutdown);
        }

        let limit = self.shared.config.stop_timeout;
        let result = match worker.exited.recv_timeout(limit) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    warn!("Network thread panicked during shutdown");
                }
                Ok(StopOutcome::Stopped)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Network thread did not exit within {:?}, detaching", limit);
                Err(ServerError::StopTimeout(limit))
            }
        };

        self.shared.client_count.store(0, Ordering::Release);
        self.shared.set_state(ServerState::Stopped);
        info!("Server stopped");
        result
    }

    fn spawn_worker(&self) -> Result<Worker, ServerError> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (bound_tx, bound_rx) = sync_channel::<Result<SocketAddr, ServerError>>(1);
        let (exited_tx, exited_rx) = sync_channel::<()>(1);
        let shared = Arc::clone(&self.shared);

        let thread = thread::Builder::new()
            .name("pixsync-net".into())
            .spawn(move || {
                let _exit = ExitSignal(exited_tx);
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = bound_tx.send(Err(ServerError::Runtime(e)));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let addr = shared.config.addr;
                    let bound = match TcpListener::bind(addr).await {
                        Ok(listener) => listener.local_addr().map(|local| (listener, local)),
                        Err(e) => Err(e),
                    };
                    let (listener, local) = match bound {
                        Ok(bound) => bound,
                        Err(source) => {
                            let _ = bound_tx.send(Err(ServerError::Bind { addr, source }));
                            return;
                        }
                    };

                    let _ = bound_tx.send(Ok(local));
                    run_event_loop(listener, commands_rx, shared).await;
                });
            })
            .map_err(ServerError::Spawn)?;

        match bound_rx.recv() {
            Ok(Ok(local_addr)) => {
                *self.shared.commands.lock() = Some(commands_tx);
                Ok(Worker {
                    thread,
                    exited: exited_rx,
                    local_addr,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(ServerError::WorkerExited)
            }
        }
    }

    fn dispatch(&self, message: &Envelope, target: Option<ClientId>) -> BroadcastOutcome {
        let status = self.status();
        if !status.running || status.client_count == 0 {
            debug!("No clients connected, not sending {}", message.kind);
            return BroadcastOutcome::NoAudience;
        }

        let frame: Arc<str> = match message.to_frame() {
            Ok(frame) => frame.into(),
            Err(e) => {
                error!("Failed to serialize {}, not sending: {}", message.kind, e);
                return BroadcastOutcome::NoAudience;
            }
        };

        let commands = match self.shared.commands.lock().as_ref() {
            Some(commands) => commands.clone(),
            None => return BroadcastOutcome::NoAudience,
        };

        let (reply, rx) = sync_channel(1);
        if commands
            .send(Command::Send {
                frame,
                target,
                reply,
            })
            .is_err()
        {
            warn!("Network loop is gone, dropping {}", message.kind);
            return BroadcastOutcome::NoAudience;
        }

        BroadcastOutcome::Dispatched(Delivery { rx })
    }
}

impl Broadcaster for BroadcastServer {
    fn status(&self) -> ServerStatus {
        let state = self.shared.state();
        let running = state == ServerState::Running;
        ServerStatus {
            running,
            client_count: if running {
                self.shared.client_count.load(Ordering::Acquire)
            } else {
                0
            },
            state,
        }
    }

    fn broadcast(&self, message: &Envelope) -> BroadcastOutcome {
        self.dispatch(message, None)
    }

    fn send_to(&self, client: ClientId, message: &Envelope) -> BroadcastOutcome {
        self.dispatch(message, Some(client))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event loop (network thread)
// ─────────────────────────────────────────────────────────────────────────────

async fn run_event_loop(
    listener: TcpListener,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
) {
    let settings = shared.config.connection_settings();
    let observer = Arc::clone(shared.router.observer());
    let mut clients = ClientSet::new(Arc::clone(&shared.client_count));
    let mut connections = JoinSet::new();
    let (events_tx, mut events) = mpsc::unbounded_channel::<ClientEvent>();
    let (done_tx, mut done) = mpsc::unbounded_channel::<FanOutDone>();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("New connection from {}", addr);
                        let router = shared.router.clone();
                        let events = events_tx.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_client(stream, addr, router, events, settings).await {
                                warn!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }

            Some(event) = events.recv() => {
                match event {
                    ClientEvent::Connected(handle) => {
                        let info = handle.info.clone();
                        clients.insert(handle);
                        info!("Client {} connected. Total clients: {}", info, clients.len());
                        isolate("on_connected", || observer.on_connected(&info));
                    }
                    ClientEvent::Disconnected(id) => {
                        if let Some(handle) = clients.remove(id) {
                            info!("Client {} removed. Total clients: {}", handle.info, clients.len());
                            isolate("on_disconnected", || observer.on_disconnected(&handle.info));
                        }
                    }
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Command::Send { frame, target, reply }) => {
                        let targets = match target {
                            Some(id) => clients.get(id).cloned().into_iter().collect(),
                            None => clients.handles(),
                        };
                        if targets.is_empty() {
                            let _ = reply.try_send(DeliveryReport::default());
                            continue;
                        }

                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            let attempted = targets.len();
                            let (delivered, failed) = fan_out(targets, frame).await;
                            let _ = done_tx.send(FanOutDone { attempted, delivered, failed, reply });
                        });
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }

            Some(finished) = done.recv() => {
                let mut pruned = 0;
                for id in finished.failed {
                    if let Some(handle) = clients.remove(id) {
                        pruned += 1;
                        warn!("Removed dead client {}", handle.info);
                        handle.close();
                        isolate("on_disconnected", || observer.on_disconnected(&handle.info));
                    }
                }
                if pruned > 0 {
                    info!("Cleaned up {} dead connections. Active clients: {}", pruned, clients.len());
                }
                let _ = finished.reply.try_send(DeliveryReport {
                    attempted: finished.attempted,
                    delivered: finished.delivered,
                    pruned,
                });
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Shutdown: close peers best-effort, then release the port.
    let remaining = clients.drain();
    for handle in &remaining {
        handle.close();
    }

    let close_all = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(shared.config.close_timeout, close_all)
        .await
        .is_err()
    {
        debug!("Some connections did not close in time, aborting them");
    }
    connections.abort_all();

    for handle in &remaining {
        isolate("on_disconnected", || observer.on_disconnected(&handle.info));
    }

    drop(listener);
    debug!("Listener closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::LoggingObserver;
    use pixsync_core::mailbox;

    fn server(addr: SocketAddr) -> BroadcastServer {
        let (updates, _) = mailbox();
        let (pulls, _) = mailbox();
        let config = ServerConfig {
            addr,
            ..ServerConfig::default()
        };
        BroadcastServer::new(config, updates, pulls, Arc::new(LoggingObserver))
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8765);
        assert_eq!(config.stop_timeout, Duration::from_secs(5));
        assert_eq!(config.ping_interval, Duration::from_secs(20));
    }

    #[test]
    fn test_stopped_server_has_no_audience() {
        let server = server("127.0.0.1:0".parse().unwrap());
        let status = server.status();
        assert!(!status.running);
        assert_eq!(status.client_count, 0);
        assert_eq!(status.state, ServerState::Stopped);

        let outcome = server.broadcast(&Envelope::push("X", serde_json::Value::Null));
        assert!(!outcome.is_dispatched());
    }

    #[test]
    fn test_stop_when_stopped() {
        let server = server("127.0.0.1:0".parse().unwrap());
        assert_eq!(server.stop().unwrap(), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn test_bind_failure_leaves_server_stopped() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let server = server(taken.local_addr().unwrap());

        let err = server.start().unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert_eq!(server.status().state, ServerState::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            ServerState::Stopped,
            ServerState::Starting,
            ServerState::Running,
            ServerState::Stopping,
        ] {
            assert_eq!(ServerState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_ready_delivery() {
        let delivery = Delivery::ready(DeliveryReport {
            attempted: 1,
            delivered: 1,
            pruned: 0,
        });
        let report = delivery.wait(Duration::from_millis(10)).unwrap();
        assert!(report.is_success());
    }
}

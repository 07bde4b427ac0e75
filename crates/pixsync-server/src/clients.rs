//! Live client set and per-connection tasks.
//!
//! Each connection owns a FIFO outbound channel, so frames aimed at one
//! client always leave in the order they were queued. The set itself is
//! only touched from the network thread.

use crate::handlers::Router;
use crate::observer::ClientInfo;
use futures_util::stream::SplitSink;
use futures_util::{future, SinkExt, StreamExt};
use pixsync_core::ClientId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Work for a connection's writer.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame {
        text: Arc<str>,
        ack: oneshot::Sender<bool>,
    },
    Close,
}

/// Lifecycle notifications from connection tasks to the event loop.
#[derive(Debug)]
pub(crate) enum ClientEvent {
    Connected(ClientHandle),
    Disconnected(ClientId),
}

/// The event loop's handle on one live connection.
#[derive(Debug, Clone)]
pub(crate) struct ClientHandle {
    pub info: ClientInfo,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ClientHandle {
    pub fn new(info: ClientInfo) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { info, tx }, rx)
    }

    pub fn id(&self) -> ClientId {
        self.info.id
    }

    /// Queues a frame. The receiver resolves to `true` once written.
    pub fn send(&self, text: Arc<str>) -> oneshot::Receiver<bool> {
        let (ack, done) = oneshot::channel();
        // On failure the ack is dropped with the message, which reads as
        // an undelivered frame.
        let _ = self.tx.send(Outbound::Frame { text, ack });
        done
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// The set of connections eligible for broadcasts.
#[derive(Debug)]
pub(crate) struct ClientSet {
    clients: HashMap<ClientId, ClientHandle>,
    count: Arc<AtomicUsize>,
}

impl ClientSet {
    /// `count` mirrors the set size for lock-free status reads.
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.store(0, Ordering::Release);
        Self {
            clients: HashMap::new(),
            count,
        }
    }

    pub fn insert(&mut self, handle: ClientHandle) -> bool {
        let fresh = self.clients.insert(handle.id(), handle).is_none();
        self.sync_count();
        fresh
    }

    /// Removes a client. Safe to call more than once.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientHandle> {
        let removed = self.clients.remove(&id);
        self.sync_count();
        removed
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub fn handles(&self) -> Vec<ClientHandle> {
        self.clients.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Empties the set, returning everything that was in it.
    pub fn drain(&mut self) -> Vec<ClientHandle> {
        let drained = self.clients.drain().map(|(_, h)| h).collect();
        self.sync_count();
        drained
    }

    fn sync_count(&self) {
        self.count.store(self.clients.len(), Ordering::Release);
    }
}

/// Result of one broadcast or directed send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients the frame was offered to.
    pub attempted: usize,
    pub delivered: usize,
    /// Clients removed because delivery failed.
    pub pruned: usize,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.delivered > 0
    }
}

/// Offers `text` to every target concurrently and waits for each writer.
///
/// Returns the number delivered and the ids whose delivery failed.
pub(crate) async fn fan_out(targets: Vec<ClientHandle>, text: Arc<str>) -> (usize, Vec<ClientId>) {
    let pending: Vec<_> = targets
        .iter()
        .map(|client| {
            let done = client.send(Arc::clone(&text));
            async move { (client.id(), done.await.unwrap_or(false)) }
        })
        .collect();

    let results = future::join_all(pending).await;

    let mut delivered = 0;
    let mut failed = Vec::new();
    for (id, ok) in results {
        if ok {
            delivered += 1;
        } else {
            failed.push(id);
        }
    }

    (delivered, failed)
}

/// Connection tuning shared by every client task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub send_timeout: Duration,
    pub close_timeout: Duration,
    pub max_message_size: usize,
}

impl ConnectionSettings {
    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        }
    }
}

/// Handles a single WebSocket client connection.
pub(crate) async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    router: Router,
    events: mpsc::UnboundedSender<ClientEvent>,
    settings: ConnectionSettings,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = accept_async_with_config(stream, Some(settings.websocket_config())).await?;
    let info = ClientInfo::new(addr);
    let (handle, outbound) = ClientHandle::new(info.clone());

    if events.send(ClientEvent::Connected(handle)).is_err() {
        // Event loop is shutting down
        return Ok(());
    }
    info!("✅ WebSocket handshake complete with {}", addr);

    let outcome = serve_client(ws_stream, &info, &router, outbound, settings).await;

    let _ = events.send(ClientEvent::Disconnected(info.id));
    outcome
}

async fn serve_client(
    ws_stream: WebSocketStream<TcpStream>,
    info: &ClientInfo,
    router: &Router,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    settings: ConnectionSettings,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let (mut write, mut read) = ws_stream.split();

    let mut ping_timer = interval_at(Instant::now(), settings.ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;
        let pong_wait = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("📥 Received from {}: {}", info, text);
                        if let Some(reply) = router.route(info, &text) {
                            if !send_frame(&mut write, Message::Text(reply), settings.send_timeout).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("👋 Client {} disconnected gracefully", info);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("⚠️  Error from {}: {}", info, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            out = outbound.recv() => {
                match out {
                    Some(Outbound::Frame { text, ack }) => {
                        let ok = send_frame(&mut write, Message::Text(text.to_string()), settings.send_timeout).await;
                        let _ = ack.send(ok);
                        if !ok {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = timeout(settings.close_timeout, write.send(Message::Close(None))).await;
                        break;
                    }
                }
            }

            _ = ping_timer.tick() => {
                if !send_frame(&mut write, Message::Ping(Vec::new()), settings.send_timeout).await {
                    break;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + settings.pong_timeout);
                }
            }

            _ = pong_wait => {
                warn!("Client {} missed keepalive pong, dropping", info);
                break;
            }
        }
    }

    info!("🔌 Connection closed: {}", info);
    Ok(())
}

async fn send_frame(write: &mut WsSink, msg: Message, limit: Duration) -> bool {
    match timeout(limit, write.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Send failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Send timed out after {:?}", limit);
            false
        }
    }
}

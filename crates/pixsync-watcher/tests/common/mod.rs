#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A blocking WebSocket peer for tests running on a plain thread.
pub struct TestPeer {
    runtime: Runtime,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestPeer {
    pub fn connect(addr: SocketAddr) -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let url = format!("ws://127.0.0.1:{}", addr.port());
        let (socket, _) = runtime.block_on(connect_async(url)).expect("ws connect");
        Self { runtime, socket }
    }

    pub fn send_text(&mut self, text: &str) {
        self.runtime
            .block_on(self.socket.send(Message::Text(text.to_string())))
            .expect("ws send");
    }

    pub fn send_json(&mut self, value: &Value) {
        self.send_text(&value.to_string());
    }

    /// Next text frame, skipping control frames.
    pub fn recv_text(&mut self, limit: Duration) -> Option<String> {
        let socket = &mut self.socket;
        self.runtime.block_on(async move {
            let deadline = tokio::time::Instant::now() + limit;
            loop {
                match tokio::time::timeout_at(deadline, socket.next()).await {
                    Ok(Some(Ok(Message::Text(text)))) => return Some(text),
                    Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return None,
                    Ok(Some(Ok(_))) => continue,
                    Err(_) => return None,
                }
            }
        })
    }

    pub fn recv_json(&mut self, limit: Duration) -> Option<Value> {
        self.recv_text(limit)
            .and_then(|text| serde_json::from_str(&text).ok())
    }

    /// True once the server has closed the connection.
    pub fn is_closed(&mut self, limit: Duration) -> bool {
        let socket = &mut self.socket;
        self.runtime.block_on(async move {
            let deadline = tokio::time::Instant::now() + limit;
            loop {
                match tokio::time::timeout_at(deadline, socket.next()).await {
                    Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => return true,
                    Ok(Some(Ok(_))) => continue,
                    Err(_) => return false,
                }
            }
        })
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Polls `check` until it holds or `limit` passes.
pub fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + limit;
    while Instant::now() < end {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

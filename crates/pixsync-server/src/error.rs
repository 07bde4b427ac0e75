use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle failures surfaced to callers of start/stop.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to spawn network thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Failed to build network runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("Network thread exited before the listener was bound")]
    WorkerExited,
    #[error("Network thread did not stop within {0:?}")]
    StopTimeout(Duration),
}

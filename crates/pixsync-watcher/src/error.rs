use pixsync_core::CoreError;
use pixsync_server::ServerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Bridge is already attached to a scheduler")]
    AlreadyAttached,
}

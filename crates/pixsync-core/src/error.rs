use std::path::PathBuf;
use thiserror::Error;

use crate::host::ResourceKind;
use crate::scheduler::TimerId;

/// Errors raised by owner-thread primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{operation} must run on the owner thread (called from {caller})")]
    WrongThread {
        operation: &'static str,
        caller: String,
    },
}

/// Reasons a host refuses a mutation.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Payload file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Resource '{key}' is a protected {kind} resource")]
    Protected { key: String, kind: ResourceKind },
    #[error("Invalid resource key '{0}'")]
    InvalidKey(String),
    #[error("Host rejected '{key}': {reason}")]
    Rejected { key: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Timer {0} is not registered")]
    NotRegistered(TimerId),
}

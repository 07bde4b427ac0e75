//! Owner-thread identity.

use crate::error::CoreError;
use std::thread::{self, ThreadId};
use tracing::error;

/// Remembers which thread owns host state and rejects calls from any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerThread {
    id: ThreadId,
}

impl OwnerThread {
    /// Claims the calling thread as the owner.
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Fails fast when `operation` is invoked off the owner thread.
    pub fn check(&self, operation: &'static str) -> Result<(), CoreError> {
        if self.is_current() {
            return Ok(());
        }

        let current = thread::current();
        let caller = current
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        error!("{} called off the owner thread from {}", operation, caller);

        Err(CoreError::WrongThread { operation, caller })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_thread_passes() {
        let owner = OwnerThread::current();
        assert!(owner.check("drain_and_apply").is_ok());
    }

    #[test]
    fn test_other_thread_rejected() {
        let owner = OwnerThread::current();
        let result = thread::Builder::new()
            .name("intruder".into())
            .spawn(move || owner.check("drain_and_apply"))
            .unwrap()
            .join()
            .unwrap();

        match result {
            Err(CoreError::WrongThread { operation, caller }) => {
                assert_eq!(operation, "drain_and_apply");
                assert_eq!(caller, "intruder");
            }
            other => panic!("expected WrongThread, got {:?}", other),
        }
    }
}

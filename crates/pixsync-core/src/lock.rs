//! Scoped exclusion between host reads and the drain loop's writes.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Guards host-resource reads and writes that must not interleave.
///
/// Held for one fingerprint computation or one apply, never across a
/// network call. The guard releases on drop, including on unwind.
#[derive(Debug, Clone, Default)]
pub struct MutationLock {
    inner: Arc<Mutex<()>>,
}

/// Proof that the holder has exclusive access to host resources.
pub struct MutationGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl MutationLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> MutationGuard<'_> {
        MutationGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Returns `None` if someone else holds the lock.
    pub fn try_acquire(&self) -> Option<MutationGuard<'_>> {
        self.inner
            .try_lock()
            .map(|guard| MutationGuard { _guard: guard })
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = MutationLock::new();
        {
            let _g = lock.acquire();
            assert!(lock.is_held());
            assert!(lock.try_acquire().is_none());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let lock = MutationLock::new();
        let cloned = lock.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _g = cloned.acquire();
            panic!("host blew up");
        }));
        assert!(result.is_err());
        assert!(lock.try_acquire().is_some());
    }
}

//! In-memory [`Host`] for headless runs and tests.

use crate::error::HostError;
use crate::host::{ApplyHints, Host, Payload, ResourceEntry, ResourceInfo, ResourceKind, UvLayout};
use std::cell::{Cell, RefCell};
use tracing::debug;

/// A host whose resources live in a plain list.
///
/// Every successful [`Host::apply`] is recorded so callers can inspect what
/// was mutated and with which payload.
#[derive(Debug, Default)]
pub struct MemoryHost {
    resources: RefCell<Vec<ResourceEntry>>,
    uv: RefCell<UvLayout>,
    applied: RefCell<Vec<(String, Payload)>>,
    reject: RefCell<Vec<String>>,
    reads: Cell<usize>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: Vec<ResourceEntry>) -> Self {
        let host = Self::new();
        *host.resources.borrow_mut() = resources;
        host
    }

    pub fn insert(&self, entry: ResourceEntry) {
        let mut resources = self.resources.borrow_mut();
        match resources.iter_mut().find(|r| r.key == entry.key) {
            Some(existing) => *existing = entry,
            None => resources.push(entry),
        }
    }

    pub fn remove(&self, key: &str) {
        self.resources.borrow_mut().retain(|r| r.key != key);
    }

    pub fn set_uv_layout(&self, layout: UvLayout) {
        *self.uv.borrow_mut() = layout;
    }

    /// Makes every future apply for `key` fail.
    pub fn reject_key(&self, key: impl Into<String>) {
        self.reject.borrow_mut().push(key.into());
    }

    /// Successful applies so far, in order.
    pub fn applied(&self) -> Vec<(String, Payload)> {
        self.applied.borrow().clone()
    }

    /// How many times the inventory was read.
    pub fn inventory_reads(&self) -> usize {
        self.reads.get()
    }
}

impl Host for MemoryHost {
    fn apply(
        &self,
        key: &str,
        payload: &Payload,
        hints: &ApplyHints,
    ) -> Result<ResourceInfo, HostError> {
        if self.reject.borrow().iter().any(|k| k == key) {
            return Err(HostError::Rejected {
                key: key.to_string(),
                reason: "rejected by test host".into(),
            });
        }

        if let Some(existing) = self.resources.borrow().iter().find(|r| r.key == key) {
            if existing.kind.is_protected() {
                return Err(HostError::Protected {
                    key: key.to_string(),
                    kind: existing.kind,
                });
            }
        }

        let size = hints.project_size.unwrap_or([0, 0]);
        let path = payload
            .as_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        self.insert(ResourceEntry {
            key: key.to_string(),
            path,
            size,
            kind: ResourceKind::Image,
            packed: true,
            active: false,
        });
        self.applied
            .borrow_mut()
            .push((key.to_string(), payload.clone()));
        debug!("MemoryHost applied {}", key);

        Ok(ResourceInfo {
            key: key.to_string(),
            size,
            packed: true,
        })
    }

    fn read_inventory(&self) -> Vec<ResourceEntry> {
        self.reads.set(self.reads.get() + 1);
        self.resources.borrow().clone()
    }

    fn uv_layout(&self) -> UvLayout {
        self.uv.borrow().clone()
    }
}

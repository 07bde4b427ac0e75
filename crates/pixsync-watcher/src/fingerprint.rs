//! Cheap digests of host state slices.

use pixsync_core::{ResourceEntry, UvLayout};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Deterministic digest of a slice of host state.
///
/// Equal states always produce equal fingerprints within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Digest of name, path, size and active flag of every resource.
    ///
    /// Order-independent: hosts may enumerate resources in any order.
    pub fn of_inventory(entries: &[ResourceEntry]) -> Self {
        let mut rows: Vec<(&str, &str, [u32; 2], bool)> = entries
            .iter()
            .map(|e| (e.key.as_str(), e.path.as_str(), e.size, e.active))
            .collect();
        rows.sort_unstable();

        let mut hasher = DefaultHasher::new();
        rows.len().hash(&mut hasher);
        for row in rows {
            row.hash(&mut hasher);
        }
        Self(hasher.finish())
    }

    /// Digest of every mesh name and face UV coordinate.
    pub fn of_uv_layout(layout: &UvLayout) -> Self {
        let mut hasher = DefaultHasher::new();
        layout.meshes.len().hash(&mut hasher);
        for mesh in &layout.meshes {
            mesh.name.hash(&mut hasher);
            mesh.faces.len().hash(&mut hasher);
            for face in &mesh.faces {
                face.len().hash(&mut hasher);
                for [u, v] in face {
                    u.to_bits().hash(&mut hasher);
                    v.to_bits().hash(&mut hasher);
                }
            }
        }
        Self(hasher.finish())
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

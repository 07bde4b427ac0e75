//! The host application's side of the contract.
//!
//! Pixsync never touches host-owned storage except through [`Host`]. All
//! methods are called on the owner thread only.

use crate::error::HostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of a host resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Image,
    RenderResult,
    Compositing,
    #[serde(rename = "MULTILAYER")]
    MultiLayer,
}

impl ResourceKind {
    /// Generated resources that peers must neither see nor overwrite.
    pub fn is_protected(self) -> bool {
        !matches!(self, ResourceKind::Image)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Image => "IMAGE",
            ResourceKind::RenderResult => "RENDER_RESULT",
            ResourceKind::Compositing => "COMPOSITING",
            ResourceKind::MultiLayer => "MULTILAYER",
        };
        write!(f, "{}", s)
    }
}

/// One entry of the host's resource inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub key: String,
    /// Absolute path of the backing file, empty when the resource has none.
    pub path: String,
    pub size: [u32; 2],
    pub kind: ResourceKind,
    pub packed: bool,
    /// Whether this is the resource currently being edited.
    pub active: bool,
}

impl ResourceEntry {
    pub fn image(key: impl Into<String>, path: impl Into<String>, size: [u32; 2]) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            size,
            kind: ResourceKind::Image,
            packed: false,
            active: false,
        }
    }
}

/// What a successful mutation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub key: String,
    pub size: [u32; 2],
    pub packed: bool,
}

/// New content for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Load the content from a file the peer wrote.
    Path(PathBuf),
    /// Raw encoded image bytes.
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Payload::Path(path.into())
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Payload::Path(p) => Some(p),
            Payload::Bytes(_) => None,
        }
    }
}

/// Optional hints forwarded to [`Host::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyHints {
    /// Canvas size of the peer's project, if it reported one.
    pub project_size: Option<[u32; 2]>,
}

/// UV coordinates of one mesh, one polygon per face.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshUv {
    pub name: String,
    pub faces: Vec<Vec<[f32; 2]>>,
}

/// The UV layout currently visible in the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UvLayout {
    pub meshes: Vec<MeshUv>,
}

impl UvLayout {
    pub fn is_empty(&self) -> bool {
        self.meshes.iter().all(|m| m.faces.is_empty())
    }
}

/// Interface to the host application's owned resources.
///
/// Implementations are driven exclusively from the owner thread, so they
/// are free to use interior mutability without synchronization.
pub trait Host {
    /// Replaces (or creates) the resource `key` with `payload`.
    fn apply(
        &self,
        key: &str,
        payload: &Payload,
        hints: &ApplyHints,
    ) -> Result<ResourceInfo, HostError>;

    /// Lists every resource the host currently holds.
    fn read_inventory(&self) -> Vec<ResourceEntry>;

    /// Returns the UV layout to overlay on the peer's canvas.
    ///
    /// Hosts without meshes keep the empty default.
    fn uv_layout(&self) -> UvLayout {
        UvLayout::default()
    }
}

impl<H: Host + ?Sized> Host for std::rc::Rc<H> {
    fn apply(
        &self,
        key: &str,
        payload: &Payload,
        hints: &ApplyHints,
    ) -> Result<ResourceInfo, HostError> {
        (**self).apply(key, payload, hints)
    }

    fn read_inventory(&self) -> Vec<ResourceEntry> {
        (**self).read_inventory()
    }

    fn uv_layout(&self) -> UvLayout {
        (**self).uv_layout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_kinds() {
        assert!(!ResourceKind::Image.is_protected());
        assert!(ResourceKind::RenderResult.is_protected());
        assert!(ResourceKind::Compositing.is_protected());
        assert!(ResourceKind::MultiLayer.is_protected());
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ResourceKind::RenderResult).unwrap();
        assert_eq!(json, "\"RENDER_RESULT\"");
        let json = serde_json::to_string(&ResourceKind::MultiLayer).unwrap();
        assert_eq!(json, "\"MULTILAYER\"");
        assert_eq!(ResourceKind::MultiLayer.to_string(), "MULTILAYER");
    }

    #[test]
    fn test_empty_uv_layout() {
        let layout = UvLayout {
            meshes: vec![MeshUv {
                name: "Cube".into(),
                faces: vec![],
            }],
        };
        assert!(layout.is_empty());
    }
}

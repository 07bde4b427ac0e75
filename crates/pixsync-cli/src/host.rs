//! A [`Host`] backed by a directory of PNG files.

use pixsync_core::{
    ApplyHints, Host, HostError, Payload, ResourceEntry, ResourceInfo, ResourceKind, UvLayout,
};
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Optional UV layout file next to the images.
pub const UV_LAYOUT_FILE: &str = "uv_layout.json";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Serves every `.png` in `root` as an image resource.
///
/// The most recently applied image is reported as active.
#[derive(Debug)]
pub struct DirectoryHost {
    root: PathBuf,
    active: RefCell<Option<String>>,
}

impl DirectoryHost {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root: root.canonicalize()?,
            active: RefCell::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, HostError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\'])
            && is_png(Path::new(key));
        if !valid {
            return Err(HostError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl Host for DirectoryHost {
    fn apply(
        &self,
        key: &str,
        payload: &Payload,
        hints: &ApplyHints,
    ) -> Result<ResourceInfo, HostError> {
        let target = self.resolve(key)?;

        match payload {
            Payload::Path(source) => {
                if !source.is_file() {
                    return Err(HostError::NotFound(source.clone()));
                }
                let same_file = match (source.canonicalize(), target.canonicalize()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                };
                if !same_file {
                    fs::copy(source, &target)?;
                }
            }
            Payload::Bytes(bytes) => fs::write(&target, bytes)?,
        }

        let size = match png_size(&target) {
            Ok(Some(size)) => size,
            Ok(None) => {
                warn!("{} is not a readable PNG, using reported size", key);
                hints.project_size.unwrap_or([0, 0])
            }
            Err(e) => return Err(HostError::Io(e)),
        };

        *self.active.borrow_mut() = Some(key.to_string());
        info!("Updated {} ({}x{})", target.display(), size[0], size[1]);

        Ok(ResourceInfo {
            key: key.to_string(),
            size,
            packed: false,
        })
    }

    fn read_inventory(&self) -> Vec<ResourceEntry> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot list {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let active = self.active.borrow();
        let mut entries: Vec<ResourceEntry> = dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_png(path))
            .filter_map(|path| {
                let key = path.file_name()?.to_str()?.to_string();
                let size = png_size(&path).ok().flatten().unwrap_or([0, 0]);
                Some(ResourceEntry {
                    active: active.as_deref() == Some(key.as_str()),
                    key,
                    path: path.display().to_string(),
                    size,
                    kind: ResourceKind::Image,
                    packed: false,
                })
            })
            .collect();

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn uv_layout(&self) -> UvLayout {
        let path = self.root.join(UV_LAYOUT_FILE);
        let Ok(text) = fs::read_to_string(&path) else {
            return UvLayout::default();
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!("Ignoring malformed {}: {}", path.display(), e);
            UvLayout::default()
        })
    }
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
}

/// Reads width and height from a PNG's IHDR chunk.
///
/// Returns `Ok(None)` for files that are not PNGs.
pub fn png_size(path: &Path) -> io::Result<Option<[u32; 2]>> {
    let mut header = [0u8; 24];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(parse_png_header(&header)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_png_header(header: &[u8; 24]) -> Option<[u32; 2]> {
    if header[..8] != PNG_SIGNATURE || &header[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
    let height = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);
    Some([width, height])
}

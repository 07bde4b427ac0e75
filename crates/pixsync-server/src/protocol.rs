//! Pixsync wire protocol.
//!
//! One JSON object per WebSocket text frame:
//!
//! ```json
//! { "type": "GET_IMAGES", "data": null, "requestId": 7 }
//! ```
//!
//! `requestId` is `-1` for server-initiated pushes and echoes the peer's id
//! on responses. Older peers put request parameters at the top level
//! instead of under `data`; those fields are kept in [`Envelope::extra`].

use pixsync_core::{ResourceEntry, ResourceInfo, UvLayout};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::error;

/// `requestId` of a push that answers no request.
pub const UNSOLICITED: i64 = -1;

/// Pull (or push) of the resource inventory.
pub const GET_IMAGES: &str = "GET_IMAGES";
/// Ask the owner to ingest an image the peer wrote to disk.
pub const SYNC_TEXTURE: &str = "SYNC_TEXTURE";
pub const SYNC_TEXTURE_RESPONSE: &str = "SYNC_TEXTURE_RESPONSE";
/// UV layout overlay push.
pub const GET_UV_OVERLAY: &str = "GET_UV_OVERLAY";
pub const ECHO: &str = "echo";

fn unsolicited() -> i64 {
    UNSOLICITED
}

/// The message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "requestId", default = "unsolicited")]
    pub request_id: i64,
    /// Top-level fields outside the envelope proper.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// A server-initiated push.
    pub fn push(kind: impl Into<String>, data: Value) -> Self {
        Self::reply(kind, data, UNSOLICITED)
    }

    /// A response correlated with `request_id`.
    pub fn reply(kind: impl Into<String>, data: Value, request_id: i64) -> Self {
        Self {
            kind: kind.into(),
            data,
            request_id,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_unsolicited(&self) -> bool {
        self.request_id == UNSOLICITED
    }

    /// Reads a request parameter from `data`, falling back to top-level
    /// fields for older peers.
    pub fn param(&self, name: &str) -> Option<&Value> {
        match &self.data {
            Value::Object(map) => map.get(name),
            _ => self.extra.get(name),
        }
    }

    /// The object request parameters are read from.
    fn params(&self) -> Value {
        match &self.data {
            Value::Object(_) => self.data.clone(),
            _ => Value::Object(self.extra.clone()),
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// An inbound frame after the first parsing pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Valid JSON that is not an envelope.
    Json(String),
    /// Not JSON at all.
    Text(String),
}

impl Inbound {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => match serde_json::from_value::<Envelope>(value) {
                Ok(envelope) => Inbound::Envelope(envelope),
                Err(_) => Inbound::Json(raw.to_string()),
            },
            Err(_) => Inbound::Text(raw.to_string()),
        }
    }
}

/// The acknowledgment sent back for frames that cannot be routed.
pub fn echo_frame(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(_) => json!({ "type": ECHO, "original": raw }).to_string(),
        Err(_) => format!("Echo: {}", raw),
    }
}

/// Parameters of a [`SYNC_TEXTURE`] request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncTexture {
    pub image: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub project_size: Option<[u32; 2]>,
}

impl SyncTexture {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, String> {
        let params: SyncTexture =
            serde_json::from_value(envelope.params()).map_err(|e| e.to_string())?;

        if params.image.is_empty() || params.file_path.as_os_str().is_empty() {
            return Err("missing image or file_path".into());
        }

        Ok(params)
    }
}

/// Inventory as sent to peers. Protected resources are left out.
pub fn inventory_payload(entries: &[ResourceEntry]) -> Value {
    let images: Vec<Value> = entries
        .iter()
        .filter(|e| !e.kind.is_protected())
        .map(|e| {
            json!({
                "name": e.key,
                "path": e.path,
                "size": e.size,
                "type": e.kind,
                "packed": e.packed,
            })
        })
        .collect();

    Value::Array(images)
}

pub fn inventory_message(entries: &[ResourceEntry], request_id: i64) -> Envelope {
    Envelope::reply(GET_IMAGES, inventory_payload(entries), request_id)
}

pub fn uv_overlay_message(layout: &UvLayout) -> Envelope {
    let data = serde_json::to_value(layout).unwrap_or_else(|e| {
        error!("Failed to serialize UV layout: {}", e);
        Value::Null
    });
    Envelope::push(GET_UV_OVERLAY, data).with_extra("noshow", Value::Bool(true))
}

pub fn sync_texture_ok(info: &ResourceInfo, request_id: i64) -> Envelope {
    Envelope::reply(
        SYNC_TEXTURE_RESPONSE,
        json!({
            "success": true,
            "image_name": info.key,
            "size": info.size,
            "packed": info.packed,
        }),
        request_id,
    )
}

pub fn sync_texture_failed(image: &str, error: &str, request_id: i64) -> Envelope {
    Envelope::reply(
        SYNC_TEXTURE_RESPONSE,
        json!({
            "success": false,
            "image_name": image,
            "error": error,
        }),
        request_id,
    )
}

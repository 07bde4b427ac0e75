//! Inbound message routing.
//!
//! Runs on the network thread. Nothing here touches host state: requests
//! that need the host are translated into owner-thread mailbox items.

use crate::observer::{isolate, ClientInfo, ConnectionObserver};
use crate::protocol::{
    echo_frame, sync_texture_failed, Envelope, Inbound, SyncTexture, GET_IMAGES, SYNC_TEXTURE,
};
use pixsync_core::{
    ApplyHints, InventoryPull, MailboxSender, Origin, Payload, UpdateQueue, UpdateRequest,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes parsed frames to the owner-thread mailboxes.
#[derive(Clone)]
pub(crate) struct Router {
    updates: UpdateQueue,
    pulls: MailboxSender<InventoryPull>,
    observer: Arc<dyn ConnectionObserver>,
}

impl Router {
    pub fn new(
        updates: UpdateQueue,
        pulls: MailboxSender<InventoryPull>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            updates,
            pulls,
            observer,
        }
    }

    pub fn observer(&self) -> &Arc<dyn ConnectionObserver> {
        &self.observer
    }

    /// Handles one text frame, returning an immediate reply if any.
    pub fn route(&self, client: &ClientInfo, raw: &str) -> Option<String> {
        let envelope = match Inbound::parse(raw) {
            Inbound::Envelope(envelope) => envelope,
            Inbound::Json(_) | Inbound::Text(_) => {
                debug!("Unroutable frame from {}, echoing", client);
                return Some(echo_frame(raw));
            }
        };

        isolate("on_message", || self.observer.on_message(client, &envelope));

        let origin = Origin {
            client: client.id,
            request_id: envelope.request_id,
        };

        match envelope.kind.as_str() {
            GET_IMAGES => {
                if !self.pulls.push(InventoryPull { origin }) {
                    warn!("Inventory pull from {} dropped: owner side is gone", client);
                }
                None
            }
            SYNC_TEXTURE => self.sync_texture(client, &envelope, origin),
            other => {
                warn!("Unknown message type from {}: {}", client, other);
                None
            }
        }
    }

    fn sync_texture(&self, client: &ClientInfo, envelope: &Envelope, origin: Origin) -> Option<String> {
        let params = match SyncTexture::from_envelope(envelope) {
            Ok(params) => params,
            Err(e) => {
                warn!("Invalid SYNC_TEXTURE from {}: {}", client, e);
                let image = envelope
                    .param("image")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                return sync_texture_failed(image, &e, envelope.request_id)
                    .to_frame()
                    .ok();
            }
        };

        debug!(
            "Queueing texture sync of '{}' from {}",
            params.image,
            params.file_path.display()
        );

        let request = UpdateRequest::new(params.image, Payload::Path(params.file_path))
            .with_hints(ApplyHints {
                project_size: params.project_size,
            })
            .with_origin(origin);

        if !self.updates.push(request) {
            warn!("Texture sync from {} dropped: owner side is gone", client);
        }
        None
    }
}

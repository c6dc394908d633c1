//! Transport errors.

use metachange_core::{MailboxId, PeerId};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("mailbox {0} is already bound")]
    MailboxInUse(MailboxId),
    #[error("peer {0} has already joined the cluster")]
    DuplicatePeer(PeerId),
    #[error("failed to encode or decode a message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

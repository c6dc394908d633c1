//! Addressed mailboxes and peer connectivity.
//!
//! A node owns one [`MailboxManager`]. Messages are routed by
//! [`Address`](metachange_core::Address) either to a local mailbox or, through
//! a [`Network`], to the mailbox's peer. Peer loss is observed with a
//! [`DisconnectWatcher`].
//!
//! Two networks are provided: [`LocalCluster`] links nodes in one process and
//! can simulate link failures, [`WsNode`] links processes over WebSockets.

mod connectivity;
mod error;
mod local;
mod mailbox;
mod ws;

pub use connectivity::{Connectivity, DisconnectWatcher};
pub use error::TransportError;
pub use local::LocalCluster;
pub use mailbox::{Mailbox, MailboxManager};
pub use ws::WsNode;

use metachange_core::{MailboxId, PeerId};
use serde::{Deserialize, Serialize};

/// A message in flight between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub mailbox: MailboxId,
    pub payload: serde_json::Value,
}

/// Delivers frames to remote peers.
///
/// Delivery is best effort. Implementations report link changes to the
/// manager's [`Connectivity`]; a frame for a peer without a link is dropped.
pub trait Network: Send + Sync + 'static {
    fn send_frame(&self, to: &PeerId, frame: Frame);
}

//! Addressed mailboxes.
//!
//! A [`MailboxManager`] owns every endpoint of one node. Sending is
//! fire-and-forget: a message to a missing mailbox or an unreachable peer is
//! dropped, and the sender learns about it only through a
//! [`DisconnectWatcher`](crate::DisconnectWatcher).

use crate::connectivity::{Connectivity, DisconnectWatcher};
use crate::{Frame, Network, TransportError};
use metachange_core::{Address, MailboxId, PeerId};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

/// Handle to a node's mailboxes. Cheap to clone.
#[derive(Clone)]
pub struct MailboxManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    peer: PeerId,
    next_id: AtomicU64,
    mailboxes: Mutex<HashMap<MailboxId, mpsc::UnboundedSender<serde_json::Value>>>,
    connectivity: Connectivity,
    network: Arc<dyn Network>,
}

impl MailboxManager {
    /// A manager for `peer` that sends remote frames through `network`.
    pub fn new(peer: PeerId, network: Arc<dyn Network>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connectivity: Connectivity::new(peer.clone()),
                peer,
                next_id: AtomicU64::new(MailboxId::FIRST_DYNAMIC),
                mailboxes: Mutex::new(HashMap::new()),
                network,
            }),
        }
    }

    /// The identity of the node owning these mailboxes.
    pub fn peer(&self) -> &PeerId {
        &self.inner.peer
    }

    /// Create a mailbox with a fresh id.
    pub fn mailbox<M: DeserializeOwned>(&self) -> Mailbox<M> {
        let id = MailboxId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.mailboxes.lock().insert(id, tx);
        self.bind(id, rx)
    }

    /// Bind a mailbox to a well-known id.
    pub fn well_known_mailbox<M: DeserializeOwned>(
        &self,
        id: MailboxId,
    ) -> Result<Mailbox<M>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut mailboxes = self.inner.mailboxes.lock();
            if mailboxes.contains_key(&id) {
                return Err(TransportError::MailboxInUse(id));
            }
            mailboxes.insert(id, tx);
        }
        Ok(self.bind(id, rx))
    }

    fn bind<M>(&self, id: MailboxId, rx: mpsc::UnboundedReceiver<serde_json::Value>) -> Mailbox<M> {
        Mailbox {
            address: Address::new(self.inner.peer.clone(), id),
            rx,
            manager: Arc::downgrade(&self.inner),
            _kind: PhantomData,
        }
    }

    /// Send `msg` to `to`.
    pub fn send<M: Serialize>(&self, to: &Address<M>, msg: &M) {
        let payload = match serde_json::to_value(msg) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to encode message for {}: {}", to, e);
                return;
            }
        };
        let frame = Frame {
            mailbox: to.mailbox(),
            payload,
        };
        if *to.peer() == self.inner.peer {
            self.deliver(frame);
        } else {
            self.inner.network.send_frame(to.peer(), frame);
        }
    }

    /// Hand an inbound frame to its mailbox.
    pub fn deliver(&self, frame: Frame) {
        let tx = self.inner.mailboxes.lock().get(&frame.mailbox).cloned();
        match tx {
            Some(tx) => {
                if tx.send(frame.payload).is_err() {
                    tracing::debug!("Mailbox {} closed; dropping frame", frame.mailbox);
                }
            }
            None => tracing::debug!(
                "No mailbox {} on {}; dropping frame",
                frame.mailbox,
                self.inner.peer
            ),
        }
    }

    /// Connection sessions of this node's peers.
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Watch for the loss of `peer`; see [`Connectivity::watch`].
    pub fn watch_disconnect(&self, peer: &PeerId) -> DisconnectWatcher {
        self.inner.connectivity.watch(peer)
    }

    /// Peers with a live link, sorted.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.connectivity.connected_peers()
    }

    pub(crate) fn downgrade(&self) -> WeakMailboxManager {
        WeakMailboxManager(Arc::downgrade(&self.inner))
    }
}

impl fmt::Debug for MailboxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxManager")
            .field("peer", &self.inner.peer)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub(crate) struct WeakMailboxManager(Weak<ManagerInner>);

impl WeakMailboxManager {
    pub(crate) fn upgrade(&self) -> Option<MailboxManager> {
        self.0.upgrade().map(|inner| MailboxManager { inner })
    }
}

/// A receiving endpoint for messages of type `M`.
///
/// Dropping the mailbox unbinds its address.
pub struct Mailbox<M> {
    address: Address<M>,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
    manager: Weak<ManagerInner>,
    _kind: PhantomData<fn() -> M>,
}

impl<M: DeserializeOwned> Mailbox<M> {
    /// Where peers send messages for this mailbox.
    pub fn address(&self) -> Address<M> {
        self.address.clone()
    }

    /// Receive the next message. Cancel safe.
    ///
    /// Payloads that do not decode as `M` are logged and skipped. Returns
    /// `None` once the owning manager is gone.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            let payload = self.rx.recv().await?;
            match serde_json::from_value(payload) {
                Ok(msg) => return Some(msg),
                Err(e) => tracing::warn!("Invalid message for {}: {}", self.address, e),
            }
        }
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.mailboxes.lock().remove(&self.address.mailbox());
        }
    }
}

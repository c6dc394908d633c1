//! Typed mailbox addresses.
//!
//! An address names one message endpoint on one peer. The type parameter is
//! the message kind the endpoint accepts; it exists only at compile time and
//! does not appear on the wire.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Identifier of a mailbox, unique within its owning peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailboxId(pub u64);

impl MailboxId {
    /// Well-known endpoint of a node's change handler.
    pub const CHANGE_REQUESTS: MailboxId = MailboxId(1);

    /// Ids below this value are reserved for well-known endpoints.
    pub const FIRST_DYNAMIC: u64 = 1024;

    /// Whether the id is in the reserved well-known range.
    pub fn is_well_known(&self) -> bool {
        self.0 < Self::FIRST_DYNAMIC
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of a mailbox accepting messages of type `M`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Address<M> {
    peer: PeerId,
    mailbox: MailboxId,
    #[serde(skip)]
    _kind: PhantomData<fn(M)>,
}

impl<M> Address<M> {
    /// Address mailbox `mailbox` on `peer`.
    pub fn new(peer: PeerId, mailbox: MailboxId) -> Self {
        Self {
            peer,
            mailbox,
            _kind: PhantomData,
        }
    }

    /// The peer that owns the mailbox.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// The mailbox within the peer.
    pub fn mailbox(&self) -> MailboxId {
        self.mailbox
    }
}

// Manual impls: derives would require `M: Clone` etc.
impl<M> Clone for Address<M> {
    fn clone(&self) -> Self {
        Self::new(self.peer.clone(), self.mailbox)
    }
}

impl<M> PartialEq for Address<M> {
    fn eq(&self, other: &Self) -> bool {
        self.peer == other.peer && self.mailbox == other.mailbox
    }
}

impl<M> Eq for Address<M> {}

impl<M> Hash for Address<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer.hash(state);
        self.mailbox.hash(state);
    }
}

impl<M> fmt::Debug for Address<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}{})", self.peer, self.mailbox)
    }
}

impl<M> fmt::Display for Address<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.peer, self.mailbox)
    }
}

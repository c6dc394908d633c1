//! Core types and traits for metachange.
//!
//! This crate provides the protocol primitives: peer identities, typed
//! mailbox addresses, the four negotiation messages and the merge contract
//! metadata must satisfy. Transport and the negotiation state machines live in
//! `metachange-transport` and `metachange-handler`.

mod address;
mod identity;
mod message;
mod semilattice;

pub use address::{Address, MailboxId};
pub use identity::{PeerId, PeerIdError};
pub use message::{AckMsg, CommitMsg, RequestMsg, ResultMsg};
pub use semilattice::{Metadata, Semilattice, Versioned};

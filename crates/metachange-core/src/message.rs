//! Negotiation messages.
//!
//! A negotiation is Request -> Ack -> Commit -> Result. Each message is a
//! one-shot send to the address carried by the previous one:
//!
//! | Message | Direction |
//! |---|---|
//! | [`RequestMsg`] | proposer -> owner |
//! | [`AckMsg`] | owner -> proposer |
//! | [`CommitMsg`] | proposer -> owner |
//! | [`ResultMsg`] | owner -> proposer |
//!
//! The messages are generic over the metadata type; this crate provides the
//! envelope only.

use crate::Address;
use serde::{Deserialize, Serialize};

/// Opens a negotiation with a change handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct RequestMsg<T> {
    /// Where the owner sends its [`AckMsg`].
    pub ack_address: Address<AckMsg<T>>,
}

/// The owner's baseline and the channel for the eventual commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMsg<T> {
    /// Snapshot of the owner's metadata when the negotiation started.
    pub metadata: T,
    pub commit_address: Address<CommitMsg<T>>,
}

/// Commits or abandons a negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitMsg<T> {
    /// Attempt to merge `metadata` into the owner's value.
    Commit {
        metadata: T,
        result_address: Address<ResultMsg>,
    },
    /// The proposer no longer wants to change anything.
    Abandon,
}

impl<T> CommitMsg<T> {
    /// `true` for a commit, `false` for an abandon.
    pub fn is_commit(&self) -> bool {
        matches!(self, CommitMsg::Commit { .. })
    }
}

/// Outcome of a [`CommitMsg::Commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMsg {
    pub success: bool,
}

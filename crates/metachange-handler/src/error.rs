//! Negotiation errors.

use metachange_core::PeerId;

/// Failure to start a negotiation.
///
/// Everything after the handshake is reported as a plain `bool` by
/// [`NegotiationProxy::commit`](crate::NegotiationProxy::commit).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("peer {0} was lost before acknowledging the request")]
    PeerLost(PeerId),
}

/// A change handler was dropped while negotiations were still running.
///
/// This is a lifetime bug in the caller, reported by panicking; drain with
/// [`ChangeHandler::shutdown`](crate::ChangeHandler::shutdown) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("change handler dropped with {active} active negotiations")]
pub struct TeardownViolation {
    pub active: usize,
}

//! Negotiated changes to a peer's metadata.
//!
//! Every node runs a [`ChangeHandler`] over its local [`MetadataView`]. A
//! node that wants to change a peer's metadata opens a [`NegotiationProxy`]
//! against the peer's handler, reads the baseline it is handed and commits a
//! new value computed from it. The commit succeeds only if the owner has not
//! written locally since the baseline was taken; otherwise the proposer is
//! told to retry.
//!
//! ```text
//! proposer                      owner
//!    | --- Request ----------------> |  register negotiation
//!    | <-- Ack(baseline, commit) --- |
//!    | --- Commit(value, result) --> |  merge unless invalidated
//!    | <-- Result(success) --------- |
//! ```

mod drain;
mod error;
mod handler;
mod proxy;
mod retry;
mod view;

pub use drain::{DrainLock, Drainer};
pub use error::{NegotiationError, TeardownViolation};
pub use handler::ChangeHandler;
pub use proxy::NegotiationProxy;
pub use retry::{Outcome, propose_with_retry};
pub use view::{InMemoryView, MetadataView};

#[cfg(test)]
mod testing;

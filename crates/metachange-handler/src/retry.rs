//! Reject-and-retry on top of [`NegotiationProxy`].

use crate::error::NegotiationError;
use crate::proxy::NegotiationProxy;
use metachange_core::{Address, Metadata, RequestMsg};
use metachange_transport::MailboxManager;

/// How [`propose_with_retry`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The owner accepted this value.
    Committed(T),
    /// The change closure declined to propose anything.
    Abandoned,
    /// Every attempt was rejected or lost its result.
    Exhausted,
}

/// Negotiate a change computed by `change` from the owner's current value,
/// reopening with a fresh baseline each time a commit is rejected.
///
/// `change` returning `None` abandons. A commit whose result was lost to a
/// disconnect counts as a failed attempt; the next attempt then fails to open
/// unless the owner is reachable again.
pub async fn propose_with_retry<T, F>(
    manager: &MailboxManager,
    request_address: &Address<RequestMsg<T>>,
    attempts: usize,
    mut change: F,
) -> Result<Outcome<T>, NegotiationError>
where
    T: Metadata,
    F: FnMut(&T) -> Option<T>,
{
    for attempt in 1..=attempts {
        let proxy = NegotiationProxy::open(manager, request_address).await?;
        let Some(proposed) = change(proxy.get()) else {
            return Ok(Outcome::Abandoned);
        };
        if proxy.commit(proposed.clone()).await {
            return Ok(Outcome::Committed(proposed));
        }
        tracing::debug!(
            "Change to {} not accepted (attempt {}/{})",
            request_address.peer(),
            attempt,
            attempts
        );
    }
    Ok(Outcome::Exhausted)
}

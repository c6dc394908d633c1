//! The proposer side of a negotiation.

use crate::error::NegotiationError;
use metachange_core::{AckMsg, Address, CommitMsg, Metadata, RequestMsg, ResultMsg};
use metachange_transport::{DisconnectWatcher, Mailbox, MailboxManager};

/// One outstanding negotiation with a peer's [`ChangeHandler`](crate::ChangeHandler).
///
/// Holds the baseline the owner handed out. Either [`commit`](Self::commit)
/// a value computed from it, or drop the proxy to abandon the negotiation.
pub struct NegotiationProxy<T: Metadata> {
    manager: MailboxManager,
    baseline: T,
    commit_address: Address<CommitMsg<T>>,
    // Cleared once a commit has been sent; the owner then needs no abandon.
    interest: bool,
}

impl<T: Metadata> NegotiationProxy<T> {
    /// Start a negotiation with the handler at `request_address`.
    ///
    /// Fails with [`NegotiationError::PeerLost`] if the owner disconnects (or
    /// is not connected) before acknowledging.
    pub async fn open(
        manager: &MailboxManager,
        request_address: &Address<RequestMsg<T>>,
    ) -> Result<Self, NegotiationError> {
        let owner = request_address.peer();
        let acks = manager.mailbox::<AckMsg<T>>();
        let owner_lost = manager.watch_disconnect(owner);

        manager.send(
            request_address,
            &RequestMsg {
                ack_address: acks.address(),
            },
        );
        // From here the owner may hold a negotiation for us; the guard
        // abandons it if this future is dropped before the ack is taken.
        let mut pending = PendingAck {
            manager: manager.clone(),
            waiting: Some((acks, owner_lost)),
        };

        let Some(ack) = pending.wait().await else {
            tracing::debug!("Lost {} while opening a negotiation", owner);
            return Err(NegotiationError::PeerLost(owner.clone()));
        };

        Ok(Self {
            manager: manager.clone(),
            baseline: ack.metadata,
            commit_address: ack.commit_address,
            interest: true,
        })
    }

    /// The owner's value when the negotiation was opened.
    pub fn get(&self) -> &T {
        &self.baseline
    }

    /// Ask the owner to merge `metadata`.
    ///
    /// Returns `true` only if the owner reports success. `false` means the
    /// baseline went stale, or the owner disconnected before answering; in the
    /// latter case the change may or may not have been applied.
    pub async fn commit(mut self, metadata: T) -> bool {
        self.interest = false;
        let mut results = self.manager.mailbox::<ResultMsg>();
        let mut owner_lost = self.manager.watch_disconnect(self.commit_address.peer());

        self.manager.send(
            &self.commit_address,
            &CommitMsg::Commit {
                metadata,
                result_address: results.address(),
            },
        );

        tokio::select! {
            biased;
            result = results.recv() => result.is_some_and(|result| result.success),
            () = owner_lost.wait() => {
                tracing::debug!("Lost {} before the commit result", self.commit_address.peer());
                false
            }
        }
    }
}

impl<T: Metadata> Drop for NegotiationProxy<T> {
    fn drop(&mut self) {
        if self.interest {
            self.manager
                .send(&self.commit_address, &CommitMsg::<T>::Abandon);
        }
    }
}

/// The ack mailbox of an `open` that has sent its request.
///
/// Dropped while still waiting, it hands the mailbox to a background task
/// that answers the late ack with an abandon, so the owner's negotiation
/// concludes even when nobody will ever commit to it.
struct PendingAck<T: Metadata> {
    manager: MailboxManager,
    waiting: Option<(Mailbox<AckMsg<T>>, DisconnectWatcher)>,
}

impl<T: Metadata> PendingAck<T> {
    /// `None` if the owner was lost first. Cancel safe: a cancelled wait
    /// leaves the guard armed.
    async fn wait(&mut self) -> Option<AckMsg<T>> {
        let (acks, owner_lost) = self.waiting.as_mut()?;
        let ack = tokio::select! {
            biased;
            () = owner_lost.wait() => None,
            ack = acks.recv() => ack,
        };
        self.waiting = None;
        ack
    }
}

impl<T: Metadata> Drop for PendingAck<T> {
    fn drop(&mut self) {
        let Some((mut acks, mut owner_lost)) = self.waiting.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "Open cancelled outside a runtime; {} keeps its negotiation until the link drops",
                owner_lost.peer()
            );
            return;
        };
        let manager = self.manager.clone();
        runtime.spawn(async move {
            let ack = tokio::select! {
                biased;
                () = owner_lost.wait() => None,
                ack = acks.recv() => ack,
            };
            if let Some(ack) = ack {
                tracing::debug!("Abandoning negotiation with {} after a cancelled open", owner_lost.peer());
                manager.send(&ack.commit_address, &CommitMsg::<T>::Abandon);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Tags, tags};
    use metachange_core::PeerId;
    use metachange_transport::LocalCluster;
    use std::time::Duration;

    /// An owner that speaks the protocol by hand, so tests can stop it at any step.
    struct ScriptedOwner {
        cluster: LocalCluster,
        owner: MailboxManager,
        proposer: MailboxManager,
        requests: Mailbox<RequestMsg<Tags>>,
    }

    impl ScriptedOwner {
        fn new() -> Self {
            let cluster = LocalCluster::new();
            let owner = cluster.join(PeerId::node("owner")).unwrap();
            let proposer = cluster.join(PeerId::node("proposer")).unwrap();
            let requests = owner.mailbox();
            Self {
                cluster,
                owner,
                proposer,
                requests,
            }
        }

        fn open(&self) -> tokio::task::JoinHandle<Result<NegotiationProxy<Tags>, NegotiationError>> {
            let proposer = self.proposer.clone();
            let address = self.requests.address();
            tokio::spawn(async move { NegotiationProxy::open(&proposer, &address).await })
        }

        /// Answer the next request with `baseline`; returns the commit mailbox.
        async fn ack(&mut self, baseline: &[&str]) -> Mailbox<CommitMsg<Tags>> {
            let request = self.requests.recv().await.unwrap();
            let commits = self.owner.mailbox();
            self.owner.send(
                &request.ack_address,
                &AckMsg {
                    metadata: tags(baseline),
                    commit_address: commits.address(),
                },
            );
            commits
        }

        fn cut(&self) {
            self.cluster.disconnect(self.owner.peer(), self.proposer.peer());
        }
    }

    async fn within<F: std::future::Future>(f: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(1), f)
            .await
            .expect("should not hang")
    }

    #[tokio::test]
    async fn disconnect_before_ack_fails_open() {
        let mut owner = ScriptedOwner::new();
        let opening = owner.open();
        owner.requests.recv().await.unwrap();
        owner.cut();

        let result = within(opening).await.unwrap();
        assert_eq!(result.err(), Some(NegotiationError::PeerLost(PeerId::node("owner"))));
    }

    #[tokio::test]
    async fn open_against_unreachable_peer_fails_immediately() {
        let cluster = LocalCluster::new();
        let proposer = cluster.join(PeerId::node("proposer")).unwrap();
        let nowhere: Address<RequestMsg<Tags>> =
            Address::new(PeerId::node("ghost"), metachange_core::MailboxId::CHANGE_REQUESTS);
        let result = within(NegotiationProxy::open(&proposer, &nowhere)).await;
        assert!(matches!(result, Err(NegotiationError::PeerLost(_))));
    }

    #[tokio::test]
    async fn disconnect_before_result_returns_false() {
        let mut owner = ScriptedOwner::new();
        let opening = owner.open();
        let mut commits = owner.ack(&["x"]).await;
        let proxy = opening.await.unwrap().unwrap();
        assert_eq!(proxy.get(), &tags(&["x"]));

        let committing = tokio::spawn(proxy.commit(tags(&["x", "y"])));
        let commit = commits.recv().await.unwrap();
        assert!(commit.is_commit());
        owner.cut();

        assert!(!within(committing).await.unwrap());
    }

    #[tokio::test]
    async fn result_is_reported() {
        for success in [true, false] {
            let mut owner = ScriptedOwner::new();
            let opening = owner.open();
            let mut commits = owner.ack(&[]).await;
            let proxy = opening.await.unwrap().unwrap();

            let committing = tokio::spawn(proxy.commit(tags(&["y"])));
            let Some(CommitMsg::Commit {
                metadata,
                result_address,
            }) = commits.recv().await
            else {
                panic!("expected a commit");
            };
            assert_eq!(metadata, tags(&["y"]));
            owner.owner.send(&result_address, &ResultMsg { success });

            assert_eq!(within(committing).await.unwrap(), success);
        }
    }

    #[tokio::test]
    async fn dropping_sends_abandon_exactly_once() {
        let mut owner = ScriptedOwner::new();
        let opening = owner.open();
        let mut commits = owner.ack(&["x"]).await;
        let proxy = opening.await.unwrap().unwrap();

        drop(proxy);
        let msg = within(commits.recv()).await.unwrap();
        assert!(!msg.is_commit());
        let more = tokio::time::timeout(Duration::from_millis(20), commits.recv()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn committing_suppresses_abandon() {
        let mut owner = ScriptedOwner::new();
        let opening = owner.open();
        let mut commits = owner.ack(&["x"]).await;
        let proxy = opening.await.unwrap().unwrap();

        let committing = tokio::spawn(proxy.commit(tags(&["z"])));
        let Some(CommitMsg::Commit { result_address, .. }) = commits.recv().await else {
            panic!("expected a commit");
        };
        owner.owner.send(&result_address, &ResultMsg { success: true });
        assert!(within(committing).await.unwrap());

        let more = tokio::time::timeout(Duration::from_millis(20), commits.recv()).await;
        assert!(more.is_err());
    }

    #[tokio::test]
    async fn abandon_after_disconnect_does_not_hang() {
        let mut owner = ScriptedOwner::new();
        let opening = owner.open();
        let _commits = owner.ack(&["x"]).await;
        let proxy = opening.await.unwrap().unwrap();

        owner.cut();
        within(async move { drop(proxy) }).await;
    }

    #[tokio::test]
    async fn cancelled_open_abandons_the_late_ack() {
        let mut owner = ScriptedOwner::new();
        let address = owner.requests.address();
        let opening = NegotiationProxy::<Tags>::open(&owner.proposer, &address);
        // Poll once, so the request goes out, then give up.
        let cancelled = tokio::select! {
            biased;
            _ = opening => false,
            () = std::future::ready(()) => true,
        };
        assert!(cancelled);

        let mut commits = owner.ack(&["x"]).await;
        let msg = within(commits.recv()).await.unwrap();
        assert!(!msg.is_commit());
    }
}

use crate::{ChangeHandler, InMemoryView, NegotiationProxy};
use metachange_core::PeerId;
use metachange_transport::{LocalCluster, MailboxManager};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type Tags = BTreeSet<String>;

pub(crate) fn tags(items: &[&str]) -> Tags {
    items.iter().map(|s| s.to_string()).collect()
}

/// An owner node running a handler and a linked proposer node.
pub(crate) struct Pair {
    pub handler: ChangeHandler<Tags>,
    pub owner: MailboxManager,
    pub proposer: MailboxManager,
    pub view: Arc<InMemoryView<Tags>>,
    pub cluster: LocalCluster,
}

impl Pair {
    pub fn new(initial: &[&str]) -> Self {
        let cluster = LocalCluster::new();
        let owner = cluster.join(PeerId::node("owner")).unwrap();
        let proposer = cluster.join(PeerId::node("proposer")).unwrap();
        let view = Arc::new(InMemoryView::new(tags(initial)));
        let handler = ChangeHandler::<Tags>::new(owner.clone(), view.clone()).unwrap();
        Self {
            handler,
            owner,
            proposer,
            view,
            cluster,
        }
    }

    pub async fn open(&self) -> NegotiationProxy<Tags> {
        NegotiationProxy::open(&self.proposer, &self.handler.request_address())
            .await
            .unwrap()
    }
}

/// Wait until `handler` has no negotiation in flight.
pub(crate) async fn settle(handler: &ChangeHandler<Tags>) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while handler.active_negotiations() != 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("negotiations should conclude");
}

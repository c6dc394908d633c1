//! In-process cluster.

use crate::mailbox::WeakMailboxManager;
use crate::{Frame, MailboxManager, Network, TransportError};
use metachange_core::PeerId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Links nodes living in the same process.
///
/// Every node that joins is linked to every other live node. Links can be cut
/// and restored to simulate network failures; frames sent over a cut link are
/// lost.
#[derive(Clone, Default)]
pub struct LocalCluster {
    state: Arc<Mutex<ClusterState>>,
}

#[derive(Default)]
struct ClusterState {
    nodes: HashMap<PeerId, WeakMailboxManager>,
    links: HashSet<(PeerId, PeerId)>,
}

fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl ClusterState {
    fn node(&self, peer: &PeerId) -> Option<MailboxManager> {
        self.nodes.get(peer).and_then(WeakMailboxManager::upgrade)
    }
}

impl LocalCluster {
    /// An empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and link it to every live member.
    pub fn join(&self, peer: PeerId) -> Result<MailboxManager, TransportError> {
        let network = Arc::new(LocalLink {
            cluster: Arc::downgrade(&self.state),
            from: peer.clone(),
        });
        let manager = MailboxManager::new(peer.clone(), network);

        let mut state = self.state.lock();
        if state.node(&peer).is_some() {
            return Err(TransportError::DuplicatePeer(peer));
        }
        let members: Vec<(PeerId, MailboxManager)> = state
            .nodes
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|m| (id.clone(), m)))
            .collect();
        for (other_id, other) in members {
            state.links.insert(link_key(&peer, &other_id));
            manager.connectivity().peer_connected(other_id);
            other.connectivity().peer_connected(peer.clone());
        }
        state.nodes.insert(peer.clone(), manager.downgrade());
        tracing::debug!("{} joined the local cluster", peer);
        Ok(manager)
    }

    /// Cut the link between `a` and `b`. Both sides observe a disconnect.
    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        let mut state = self.state.lock();
        if !state.links.remove(&link_key(a, b)) {
            return;
        }
        if let Some(node) = state.node(a) {
            node.connectivity().peer_disconnected(b);
        }
        if let Some(node) = state.node(b) {
            node.connectivity().peer_disconnected(a);
        }
        tracing::debug!("Link {} <-> {} cut", a, b);
    }

    /// Restore a cut link.
    pub fn reconnect(&self, a: &PeerId, b: &PeerId) {
        let mut state = self.state.lock();
        let (Some(node_a), Some(node_b)) = (state.node(a), state.node(b)) else {
            return;
        };
        if a == b || !state.links.insert(link_key(a, b)) {
            return;
        }
        node_a.connectivity().peer_connected(b.clone());
        node_b.connectivity().peer_connected(a.clone());
        tracing::debug!("Link {} <-> {} restored", a, b);
    }

    /// Remove `peer` from the cluster, cutting all of its links.
    pub fn leave(&self, peer: &PeerId) {
        let others: Vec<PeerId> = {
            let state = self.state.lock();
            state
                .links
                .iter()
                .filter_map(|(a, b)| {
                    if a == peer {
                        Some(b.clone())
                    } else if b == peer {
                        Some(a.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };
        for other in &others {
            self.disconnect(peer, other);
        }
        self.state.lock().nodes.remove(peer);
    }

    /// Whether `a` and `b` can currently exchange frames.
    pub fn is_linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.state.lock().links.contains(&link_key(a, b))
    }
}

struct LocalLink {
    cluster: Weak<Mutex<ClusterState>>,
    from: PeerId,
}

impl Network for LocalLink {
    fn send_frame(&self, to: &PeerId, frame: Frame) {
        let Some(cluster) = self.cluster.upgrade() else {
            return;
        };
        let target = {
            let state = cluster.lock();
            if state.links.contains(&link_key(&self.from, to)) {
                state.node(to)
            } else {
                None
            }
        };
        match target {
            Some(target) => target.deliver(frame),
            None => tracing::debug!("No link {} -> {}; dropping frame", self.from, to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn routes_between_members() {
        let cluster = LocalCluster::new();
        let a = cluster.join(PeerId::node("a")).unwrap();
        let b = cluster.join(PeerId::node("b")).unwrap();
        assert_eq!(a.connected_peers(), vec![PeerId::node("b")]);

        let mut inbox = b.mailbox::<String>();
        a.send(&inbox.address(), &"hello".to_string());
        assert_eq!(inbox.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn cut_link_drops_frames_and_fires_watchers() {
        let cluster = LocalCluster::new();
        let a = cluster.join(PeerId::node("a")).unwrap();
        let b = cluster.join(PeerId::node("b")).unwrap();
        let mut watcher = a.watch_disconnect(b.peer());

        cluster.disconnect(a.peer(), b.peer());
        tokio::time::timeout(Duration::from_secs(1), watcher.wait())
            .await
            .expect("watcher should fire");
        assert!(b.watch_disconnect(a.peer()).is_lost());

        let mut inbox = b.mailbox::<u32>();
        a.send(&inbox.address(), &1);
        cluster.reconnect(a.peer(), b.peer());
        a.send(&inbox.address(), &2);
        assert_eq!(inbox.recv().await, Some(2));
    }

    #[test]
    fn duplicate_join_is_rejected() {
        let cluster = LocalCluster::new();
        let _a = cluster.join(PeerId::node("a")).unwrap();
        assert!(matches!(
            cluster.join(PeerId::node("a")),
            Err(TransportError::DuplicatePeer(_))
        ));
    }

    #[test]
    fn leave_cuts_every_link() {
        let cluster = LocalCluster::new();
        let a = cluster.join(PeerId::node("a")).unwrap();
        let b = cluster.join(PeerId::node("b")).unwrap();
        let c = cluster.join(PeerId::node("c")).unwrap();
        cluster.leave(a.peer());
        assert!(!cluster.is_linked(a.peer(), b.peer()));
        assert!(!cluster.is_linked(a.peer(), c.peer()));
        assert!(cluster.is_linked(b.peer(), c.peer()));
        assert_eq!(b.connected_peers(), vec![PeerId::node("c")]);
    }
}

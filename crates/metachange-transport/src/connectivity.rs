//! Peer connectivity and disconnect watchers.
//!
//! Each time a peer connects it starts a new session. A watcher is bound to
//! the session that was current when it was created, so a peer that drops and
//! reconnects still fires every watcher created before the drop.

use metachange_core::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

/// Tracks which peers this node currently has a link to.
pub struct Connectivity {
    local: PeerId,
    sessions: Mutex<HashMap<PeerId, watch::Sender<bool>>>,
}

impl Connectivity {
    pub(crate) fn new(local: PeerId) -> Self {
        Self {
            local,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record a new link to `peer`. Returns `false` if one already exists.
    pub fn peer_connected(&self, peer: PeerId) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&peer) {
            return false;
        }
        let (tx, _) = watch::channel(true);
        sessions.insert(peer, tx);
        true
    }

    /// Record the loss of the link to `peer`, firing its watchers.
    pub fn peer_disconnected(&self, peer: &PeerId) {
        let session = self.sessions.lock().remove(peer);
        if let Some(tx) = session {
            tx.send_replace(false);
            tracing::debug!("Peer {} lost", peer);
        }
    }

    /// Whether `peer` has a live session. Always true for the local peer.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        *peer == self.local || self.sessions.lock().contains_key(peer)
    }

    /// Remote peers with a live session, sorted.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.sessions.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Watch for the loss of `peer`.
    ///
    /// The watcher fires immediately if `peer` is not connected right now and
    /// never fires for the local peer.
    pub fn watch(&self, peer: &PeerId) -> DisconnectWatcher {
        let state = if *peer == self.local {
            WatchState::Local
        } else {
            match self.sessions.lock().get(peer) {
                Some(tx) => WatchState::Session(tx.subscribe()),
                None => WatchState::Lost,
            }
        };
        DisconnectWatcher {
            peer: peer.clone(),
            state,
        }
    }
}

/// A one-shot signal that fires when a peer's connection is lost.
pub struct DisconnectWatcher {
    peer: PeerId,
    state: WatchState,
}

enum WatchState {
    Local,
    Session(watch::Receiver<bool>),
    Lost,
}

impl DisconnectWatcher {
    /// The watched peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Wait until the peer is lost. Cancel safe.
    pub async fn wait(&mut self) {
        match &mut self.state {
            WatchState::Local => std::future::pending::<()>().await,
            WatchState::Lost => return,
            WatchState::Session(rx) => loop {
                if !*rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            },
        }
        self.state = WatchState::Lost;
    }

    /// Whether the peer has already been lost, without waiting.
    pub fn is_lost(&self) -> bool {
        match &self.state {
            WatchState::Local => false,
            WatchState::Lost => true,
            WatchState::Session(rx) => !*rx.borrow() || rx.has_changed().is_err(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_on_disconnect() {
        let conn = Connectivity::new(PeerId::node("a"));
        let b = PeerId::node("b");
        assert!(conn.peer_connected(b.clone()));
        assert!(!conn.peer_connected(b.clone()));

        let mut watcher = conn.watch(&b);
        assert!(!watcher.is_lost());
        conn.peer_disconnected(&b);
        assert!(watcher.is_lost());
        tokio::time::timeout(Duration::from_secs(1), watcher.wait())
            .await
            .expect("watcher should fire");
    }

    #[tokio::test]
    async fn unknown_peer_is_already_lost() {
        let conn = Connectivity::new(PeerId::node("a"));
        let mut watcher = conn.watch(&PeerId::node("ghost"));
        assert!(watcher.is_lost());
        watcher.wait().await;
    }

    #[tokio::test]
    async fn reconnect_does_not_revive_old_watchers() {
        let conn = Connectivity::new(PeerId::node("a"));
        let b = PeerId::node("b");
        conn.peer_connected(b.clone());
        let old = conn.watch(&b);
        conn.peer_disconnected(&b);
        conn.peer_connected(b.clone());
        assert!(old.is_lost());
        assert!(!conn.watch(&b).is_lost());
        assert_eq!(conn.connected_peers(), vec![b]);
    }

    #[tokio::test]
    async fn local_peer_never_fires() {
        let a = PeerId::node("a");
        let conn = Connectivity::new(a.clone());
        let mut watcher = conn.watch(&a);
        assert!(!watcher.is_lost());
        assert!(conn.is_connected(&a));
        let fired = tokio::time::timeout(Duration::from_millis(20), watcher.wait()).await;
        assert!(fired.is_err());
    }
}

//! WebSocket network.
//!
//! Each link starts with both sides sending a `hello` naming their peer id.
//! After that every text message is a JSON-encoded [`Frame`]. A link that
//! closes or fails marks its peer as disconnected.

use crate::{Frame, MailboxManager, Network, TransportError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metachange_core::PeerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

/// Wrapper for messages over the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Hello { peer: PeerId },
    Frame(Frame),
}

impl WireMessage {
    fn to_message(&self) -> Result<Message, TransportError> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// Outbound queues of the live links, by peer.
#[derive(Default)]
struct WsNetwork {
    next_link: AtomicU64,
    links: Mutex<HashMap<PeerId, Link>>,
}

struct Link {
    id: u64,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl WsNetwork {
    /// Returns the new link's id, or `None` if `peer` already has a link.
    fn register(&self, peer: PeerId, outbound: mpsc::UnboundedSender<Frame>) -> Option<u64> {
        let mut links = self.links.lock();
        if links.contains_key(&peer) {
            return None;
        }
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        links.insert(peer, Link { id, outbound });
        Some(id)
    }

    fn unregister(&self, peer: &PeerId) {
        self.links.lock().remove(peer);
    }

    /// Drop link `id` of `peer`. Returns `false` if a newer link has replaced it.
    fn release(&self, peer: &PeerId, id: u64) -> bool {
        let mut links = self.links.lock();
        match links.get(peer) {
            Some(link) if link.id != id => false,
            Some(_) => {
                links.remove(peer);
                true
            }
            None => true,
        }
    }
}

impl Network for WsNetwork {
    fn send_frame(&self, to: &PeerId, frame: Frame) {
        let outbound = self.links.lock().get(to).map(|link| link.outbound.clone());
        match outbound {
            Some(outbound) => {
                if outbound.send(frame).is_err() {
                    tracing::debug!("Link to {} is closing; dropping frame", to);
                }
            }
            None => tracing::debug!("No link to {}; dropping frame", to),
        }
    }
}

/// A node reachable over WebSockets.
pub struct WsNode {
    manager: MailboxManager,
    network: Arc<WsNetwork>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl WsNode {
    /// Listen on `addr` as `peer`.
    pub async fn bind(peer: PeerId, addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let network = Arc::new(WsNetwork::default());
        let manager = MailboxManager::new(peer, network.clone());

        tracing::info!("{} listening on ws://{}", manager.peer(), local_addr);
        let accept_task = tokio::spawn(accept_loop(listener, manager.clone(), network.clone()));

        Ok(Self {
            manager,
            network,
            local_addr,
            accept_task,
        })
    }

    /// The mailbox manager routing this node's frames.
    pub fn manager(&self) -> &MailboxManager {
        &self.manager
    }

    /// The address the node accepts links on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Open a link to the node at `url` (e.g. `ws://127.0.0.1:7001`).
    ///
    /// Returns the identity the remote node announced.
    pub async fn dial(&self, url: &str) -> Result<PeerId, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        let peer = establish(ws, self.manager.clone(), self.network.clone()).await?;
        tracing::info!("Linked to {} at {}", peer, url);
        Ok(peer)
    }

    /// Close the link to `peer`, if any.
    pub fn disconnect(&self, peer: &PeerId) {
        self.network.unregister(peer);
    }
}

impl Drop for WsNode {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.network.links.lock().clear();
    }
}

async fn accept_loop(listener: TcpListener, manager: MailboxManager, network: Arc<WsNetwork>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };
        let manager = manager.clone();
        let network = network.clone();

        tokio::spawn(async move {
            let result = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => establish(ws, manager, network).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(peer) => tracing::info!("Accepted link from {} ({})", peer, addr),
                Err(e) => tracing::warn!("Connection error from {}: {}", addr, e),
            }
        });
    }
}

/// Exchange hellos, register the link and spawn its pump.
async fn establish<S>(
    ws: WebSocketStream<S>,
    manager: MailboxManager,
    network: Arc<WsNetwork>,
) -> Result<PeerId, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    let hello = WireMessage::Hello {
        peer: manager.peer().clone(),
    };
    sink.send(hello.to_message()?).await?;

    let peer = loop {
        let msg = stream
            .next()
            .await
            .ok_or_else(|| TransportError::Handshake("connection closed before hello".into()))??;
        match msg {
            Message::Text(text) => match serde_json::from_str::<WireMessage>(&text)? {
                WireMessage::Hello { peer } => break peer,
                WireMessage::Frame(_) => {
                    return Err(TransportError::Handshake("frame before hello".into()));
                }
            },
            Message::Close(_) => {
                return Err(TransportError::Handshake("connection closed before hello".into()));
            }
            _ => {}
        }
    };

    if peer == *manager.peer() {
        let _ = sink.close().await;
        return Err(TransportError::Handshake("connected to self".into()));
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let Some(link_id) = network.register(peer.clone(), outbound_tx) else {
        let _ = sink.close().await;
        return Err(TransportError::Handshake(format!("already linked to {peer}")));
    };
    // A previous link may not have wound down yet; its session ends here.
    manager.connectivity().peer_disconnected(&peer);
    manager.connectivity().peer_connected(peer.clone());

    tokio::spawn(pump(peer.clone(), link_id, sink, stream, outbound_rx, manager, network));
    Ok(peer)
}

/// Move frames between the socket and the mailbox manager until the link ends.
async fn pump<S>(
    peer: PeerId,
    link_id: u64,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut stream: SplitStream<WebSocketStream<S>>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    manager: MailboxManager,
    network: Arc<WsNetwork>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    break;
                };
                let msg = match WireMessage::Frame(frame).to_message() {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("Failed to encode frame for {}: {}", peer, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!("WebSocket error to {}: {}", peer, e);
                    break;
                }
            }

            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error from {}: {}", peer, e);
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<WireMessage>(&text) {
                        Ok(WireMessage::Frame(frame)) => manager.deliver(frame),
                        Ok(WireMessage::Hello { .. }) => {
                            tracing::warn!("Unexpected hello from {}", peer);
                        }
                        Err(e) => tracing::warn!("Invalid frame from {}: {}", peer, e),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if network.release(&peer, link_id) {
        manager.connectivity().peer_disconnected(&peer);
    }
    tracing::info!("Link to {} closed", peer);
}

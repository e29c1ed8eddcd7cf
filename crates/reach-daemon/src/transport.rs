//! WebSocket implementation of `SwarmTransport`.
//!
//! Dials peers over WebSocket with a JSON handshake and keeps every
//! established link in a connection table until the remote closes it.
//! Discovery asks a rendezvous service for peers under a tag and relays each
//! `peer` frame as soon as it arrives.

use crate::connection::{DialError, PeerLink, WsStream};
use crate::message::{MAX_MESSAGE_SIZE, RendezvousMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reach_core::{PeerAddress, PeerId, PeerStream, SwarmTransport, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, TransportError>;

struct TableEntry {
    link_id: u64,
    link: PeerLink,
}

type ConnectionTable = Arc<Mutex<HashMap<PeerId, TableEntry>>>;

impl From<DialError> for TransportError {
    fn from(err: DialError) -> Self {
        match err {
            DialError::IdentityMismatch { expected, actual } => {
                TransportError::IdentityMismatch { expected, actual }
            }
            other => TransportError::Refused(other.to_string()),
        }
    }
}

pub struct WsTransport {
    local_id: PeerId,
    rendezvous_url: Option<String>,
    connections: ConnectionTable,
    next_link_id: AtomicU64,
}

impl WsTransport {
    /// Without a rendezvous URL every discovery call fails to start.
    pub fn new(local_id: PeerId, rendezvous_url: Option<String>) -> Self {
        Self {
            local_id,
            rendezvous_url,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_link_id: AtomicU64::new(1),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&peer)
    }

    /// Close every link in the table.
    pub async fn close_all(&self) {
        let entries: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, mut entry) in entries {
            debug!("Closing link to {}", entry.link.address());
            entry.link.close().await;
        }
    }

    async fn dial(&self, peer: &PeerAddress) -> Result<()> {
        let mut link = PeerLink::open(peer, self.local_id).await?;

        let peer_id = peer.id();
        let link_id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let table = Arc::downgrade(&self.connections);

        // Register before the read task starts so a fast close still finds the entry
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        link.watch(move || {
            let Some(table) = table.upgrade() else {
                return;
            };
            let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
            // A newer link to the same peer may have replaced this one
            if table.get(&peer_id).map(|e| e.link_id) == Some(link_id) {
                table.remove(&peer_id);
                debug!("Peer {} disconnected", peer_id);
            }
        });
        connections.insert(peer_id, TableEntry { link_id, link });
        Ok(())
    }

    async fn open_rendezvous(&self, url: &str, tag: &str) -> Result<WsStream> {
        let (mut ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::DiscoveryUnavailable(format!("{}: {}", url, e)))?;
        let request = RendezvousMessage::Discover {
            tag: tag.to_string(),
        };
        ws.send(Message::Text(request.to_json().into()))
            .await
            .map_err(|e| TransportError::DiscoveryUnavailable(e.to_string()))?;
        Ok(ws)
    }
}

#[async_trait]
impl SwarmTransport for WsTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Already-connected peers succeed without a new dial.
    async fn connect(&self, peer: &PeerAddress, scope: &CancellationToken) -> Result<()> {
        if self.is_connected(peer.id()) {
            debug!("Already connected to {}", peer);
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = scope.cancelled() => Err(TransportError::Cancelled),
            dialed = self.dial(peer) => dialed,
        }
    }

    async fn find_peers(&self, tag: &str, scope: CancellationToken) -> Result<PeerStream> {
        let url = self.rendezvous_url.as_deref().ok_or_else(|| {
            TransportError::DiscoveryUnavailable("no rendezvous service configured".into())
        })?;

        let ws = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(TransportError::Cancelled),
            opened = self.open_rendezvous(url, tag) => opened?,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(relay_rendezvous(ws, tx, scope));

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|peer| (peer, rx))
        })
        .boxed())
    }
}

/// Forward `peer` frames until the service ends the batch, the consumer goes
/// away or `scope` is cancelled.
async fn relay_rendezvous(
    mut ws: WsStream,
    tx: mpsc::UnboundedSender<PeerAddress>,
    scope: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            _ = tx.closed() => break,
            frame = ws.next() => frame,
        };

        let data = match frame {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Close(_))) | None => {
                debug!("Rendezvous service closed the batch");
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("Rendezvous connection failed: {}", e);
                return;
            }
        };
        if data.len() > MAX_MESSAGE_SIZE {
            warn!("Dropping oversized rendezvous frame ({} bytes)", data.len());
            continue;
        }

        match RendezvousMessage::from_bytes(&data) {
            Some(RendezvousMessage::Peer { address }) => match address.parse::<PeerAddress>() {
                Ok(peer) => {
                    if tx.send(peer).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Skipping malformed peer address {:?}: {}", address, e),
            },
            Some(RendezvousMessage::End) => break,
            Some(RendezvousMessage::Discover { .. }) | None => {
                warn!("Skipping unexpected rendezvous frame");
            }
        }
    }

    let _ = ws.close(None).await;
}

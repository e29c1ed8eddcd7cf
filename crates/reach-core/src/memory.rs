//! In-process `SwarmTransport` with scripted peers and discovery batches.
//!
//! Used by the test suites; also handy for wiring a node up without a network.

use crate::peer::{PeerAddress, PeerId};
use crate::transport::{PeerStream, Result, SwarmTransport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a scripted peer answers a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    Accept,
    Refuse,
    /// Never answers; only the caller's timeout or cancellation ends the dial.
    Hang,
    /// Accepts after the given delay.
    AcceptAfter(Duration),
}

/// What the next `find_peers` call produces.
enum DiscoveryScript {
    Batch(Vec<PeerAddress>),
    Channel(mpsc::UnboundedReceiver<PeerAddress>),
    Unavailable(String),
}

pub struct MemoryTransport {
    local_id: PeerId,
    behaviors: RwLock<HashMap<PeerId, PeerBehavior>>,
    scripts: Mutex<VecDeque<DiscoveryScript>>,
    /// Every dial in call order
    dials: Mutex<Vec<PeerId>>,
    connected: RwLock<HashSet<PeerId>>,
    discovery_calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            behaviors: RwLock::new(HashMap::new()),
            scripts: Mutex::new(VecDeque::new()),
            dials: Mutex::new(Vec::new()),
            connected: RwLock::new(HashSet::new()),
            discovery_calls: AtomicUsize::new(0),
        }
    }

    /// Register how `peer` answers dials. Unregistered peers refuse.
    pub fn set_behavior(&self, peer: PeerId, behavior: PeerBehavior) {
        self.behaviors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer, behavior);
    }

    /// Queue a finite batch for the next discovery call.
    pub fn push_batch(&self, peers: Vec<PeerAddress>) {
        self.push_script(DiscoveryScript::Batch(peers));
    }

    /// Queue an open-ended batch; peers are delivered as they are sent and the
    /// batch ends when the returned sender is dropped.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<PeerAddress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_script(DiscoveryScript::Channel(rx));
        tx
    }

    /// Make the next discovery call fail to start.
    pub fn push_unavailable(&self, reason: impl Into<String>) {
        self.push_script(DiscoveryScript::Unavailable(reason.into()));
    }

    fn push_script(&self, script: DiscoveryScript) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(script);
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn dial_log(&self) -> Vec<PeerId> {
        self.dials.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn dial_count(&self, peer: PeerId) -> usize {
        self.dial_log().iter().filter(|p| **p == peer).count()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.connected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&peer)
    }

    fn mark_connected(&self, peer: PeerId) {
        self.connected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer);
    }
}

#[async_trait]
impl SwarmTransport for MemoryTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    async fn connect(&self, peer: &PeerAddress, scope: &CancellationToken) -> Result<()> {
        self.dials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(peer.id());

        let behavior = self
            .behaviors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&peer.id())
            .copied()
            .unwrap_or(PeerBehavior::Refuse);

        match behavior {
            PeerBehavior::Accept => {}
            PeerBehavior::Refuse => {
                return Err(TransportError::Refused(format!("{} refused", peer.id())));
            }
            PeerBehavior::Hang => {
                scope.cancelled().await;
                return Err(TransportError::Cancelled);
            }
            PeerBehavior::AcceptAfter(delay) => {
                tokio::select! {
                    _ = scope.cancelled() => return Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.mark_connected(peer.id());
        Ok(())
    }

    async fn find_peers(&self, _tag: &str, _scope: CancellationToken) -> Result<PeerStream> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match script {
            None => Ok(futures::stream::empty().boxed()),
            Some(DiscoveryScript::Batch(peers)) => Ok(futures::stream::iter(peers).boxed()),
            Some(DiscoveryScript::Channel(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|peer| (peer, rx))
            })
            .boxed()),
            Some(DiscoveryScript::Unavailable(reason)) => {
                Err(TransportError::DiscoveryUnavailable(reason))
            }
        }
    }
}

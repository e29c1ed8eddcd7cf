//! Event infrastructure for reach-core.
//!
//! Provides `SwarmEvent` for progress reporting and `EventBus`, a broadcast
//! fan-out of those events. Every event is also logged through `tracing` by the
//! component that emits it; the bus exists for hosts and tests that want
//! the same information as values.

use crate::outcome::FailureCause;
use crate::peer::PeerId;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};

/// Progress events emitted by the connectivity loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SwarmEvent {
    /// A bootstrap entry could not be parsed and was skipped.
    BootstrapEntrySkipped { entry: String, reason: String },
    /// The single bootstrap pass is over.
    BootstrapFinished {
        attempted: usize,
        reached: usize,
    },
    /// A discovery cycle began.
    CycleStarted { cycle: u64 },
    /// Discovery could not start; the next tick retries.
    DiscoveryFailed { cycle: u64, error: String },
    /// Discovery produced a candidate.
    PeerFound { cycle: u64, peer: PeerId },
    /// An attempt succeeded.
    PeerConnected {
        peer: PeerId,
        #[serde(rename = "connectedCount")]
        connected_count: u64,
    },
    /// An attempt failed.
    ConnectFailed { peer: PeerId, cause: FailureCause },
    /// Every attempt spawned by the cycle has finished.
    CycleFinished {
        cycle: u64,
        connected: usize,
        failed: usize,
    },
    /// The scheduler reached its terminal state.
    Stopped,
}

/// Events a slow receiver may fall behind by before it starts losing them.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out of `SwarmEvent`s to any number of receivers.
///
/// Emitting never blocks; with no receivers the event is simply dropped.
pub struct EventBus {
    sender: broadcast::Sender<SwarmEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event emitted from now on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    pub fn emit(&self, event: SwarmEvent) {
        trace!("Emitting {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of an `EventBus` subscription.
///
/// A receiver that falls more than the bus capacity behind skips the oldest
/// events and logs how many it lost.
pub struct EventReceiver {
    inner: broadcast::Receiver<SwarmEvent>,
}

impl EventReceiver {
    /// Next event, or None once the bus is gone.
    pub async fn recv(&mut self) -> Option<SwarmEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => warn!("Event receiver lagged, {} events lost", n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the first event `select` maps to a value, skipping the rest.
    pub async fn wait_for<T>(
        &mut self,
        mut select: impl FnMut(&SwarmEvent) -> Option<T>,
    ) -> Option<T> {
        while let Some(event) = self.recv().await {
            if let Some(value) = select(&event) {
                return Some(value);
            }
        }
        None
    }

    /// Everything already emitted and not yet received, without waiting.
    pub fn drain(&mut self) -> Vec<SwarmEvent> {
        let mut events = Vec::new();
        loop {
            match self.inner.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(n)) => warn!("Event receiver lagged, {} events lost", n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
            }
        }
    }
}

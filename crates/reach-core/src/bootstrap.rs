//! One-shot warm start against statically configured peers.

use crate::events::{EventBus, SwarmEvent};
use crate::peer::{PeerAddress, PeerAddressError};
use crate::pool::ConnectionAttemptPool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A configured entry that did not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub entry: String,
    pub reason: PeerAddressError,
}

/// Well-known peers, fixed at startup.
///
/// Order follows configuration; an identity listed twice is kept once.
#[derive(Debug, Clone, Default)]
pub struct BootstrapSet {
    peers: Vec<PeerAddress>,
    skipped: Vec<SkippedEntry>,
}

impl BootstrapSet {
    /// Parse configured address strings. Malformed entries are logged and
    /// set aside; they never fail the whole set.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut seen = HashSet::new();
        let mut set = Self::default();

        for entry in entries {
            let entry = entry.as_ref();
            match entry.parse::<PeerAddress>() {
                Ok(peer) => {
                    if seen.insert(peer.id()) {
                        set.peers.push(peer);
                    }
                }
                Err(reason) => {
                    warn!("Skipping bootstrap peer {:?}: {}", entry, reason);
                    set.skipped.push(SkippedEntry {
                        entry: entry.to_string(),
                        reason,
                    });
                }
            }
        }

        set
    }

    pub fn peers(&self) -> &[PeerAddress] {
        &self.peers
    }

    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

pub struct BootstrapConnector {
    pool: ConnectionAttemptPool,
    events: Arc<EventBus>,
}

impl BootstrapConnector {
    pub fn new(pool: ConnectionAttemptPool, events: Arc<EventBus>) -> Self {
        Self { pool, events }
    }

    /// Dial every bootstrap peer once, concurrently, and return how many
    /// were reached. No retries; an unreachable peer is simply not counted.
    pub async fn run(&self, set: &BootstrapSet, scope: &CancellationToken) -> usize {
        for skipped in set.skipped() {
            self.events.emit(SwarmEvent::BootstrapEntrySkipped {
                entry: skipped.entry.clone(),
                reason: skipped.reason.to_string(),
            });
        }

        let mut attempts = self.pool.begin_cycle(scope.child_token());
        for peer in set.peers() {
            attempts.spawn(peer.clone());
        }
        let report = attempts.join().await;
        let reached = report.connected.len();

        info!("Connected to {} of {} bootstrap peers", reached, set.len());
        self.events.emit(SwarmEvent::BootstrapFinished {
            attempted: set.len(),
            reached,
        });
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ConnectedCount;
    use crate::memory::{MemoryTransport, PeerBehavior};
    use crate::peer::PeerId;
    use std::time::Duration;

    const A: &str = "ws://10.0.0.1:7000/p2p/00000000000000aa";
    const B: &str = "ws://10.0.0.2:7000/p2p/00000000000000bb";
    const C: &str = "ws://10.0.0.3:7000/p2p/00000000000000cc";

    fn id(s: &str) -> PeerId {
        s.parse::<PeerAddress>().unwrap().id()
    }

    fn connector(transport: Arc<MemoryTransport>) -> (BootstrapConnector, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let pool = ConnectionAttemptPool::new(
            transport,
            Arc::new(ConnectedCount::new()),
            events.clone(),
            Duration::from_secs(10),
            None,
        );
        (BootstrapConnector::new(pool, events.clone()), events)
    }

    #[test]
    fn test_parse_skips_malformed_and_duplicates() {
        let set = BootstrapSet::parse(&[A, "not an address", B, A, "ws://x/p2p/zz"]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.peers()[0].id(), id(A));
        assert_eq!(set.peers()[1].id(), id(B));
        assert_eq!(set.skipped().len(), 2);
        assert_eq!(set.skipped()[0].entry, "not an address");
    }

    #[tokio::test]
    async fn test_each_valid_entry_dialed_exactly_once() {
        let transport = Arc::new(MemoryTransport::new(PeerId::try_from(1).unwrap()));
        transport.set_behavior(id(A), PeerBehavior::Accept);
        transport.set_behavior(id(C), PeerBehavior::Accept);
        let (connector, _events) = connector(transport.clone());

        let set = BootstrapSet::parse(&[A, "garbage", B, C, B]);
        let reached = connector.run(&set, &CancellationToken::new()).await;

        assert_eq!(reached, 2);
        let mut dials = transport.dial_log();
        dials.sort();
        assert_eq!(dials, vec![id(A), id(B), id(C)]);
    }

    #[tokio::test]
    async fn test_skipped_entries_are_reported_as_events() {
        let transport = Arc::new(MemoryTransport::new(PeerId::try_from(1).unwrap()));
        let (connector, events) = connector(transport.clone());

        let mut rx = events.subscribe();

        let set = BootstrapSet::parse(&["ws://missing-id:1"]);
        let reached = connector.run(&set, &CancellationToken::new()).await;

        assert_eq!(reached, 0);
        assert!(transport.dial_log().is_empty());
        let seen = rx.drain();
        assert!(matches!(
            seen.first(),
            Some(SwarmEvent::BootstrapEntrySkipped { entry, .. }) if entry == "ws://missing-id:1"
        ));
        assert_eq!(
            seen.last(),
            Some(&SwarmEvent::BootstrapFinished {
                attempted: 0,
                reached: 0
            })
        );
    }

    #[tokio::test]
    async fn test_empty_set_reaches_nothing() {
        let transport = Arc::new(MemoryTransport::new(PeerId::try_from(1).unwrap()));
        let (connector, _events) = connector(transport);
        let set = BootstrapSet::parse::<&str>(&[]);
        assert_eq!(connector.run(&set, &CancellationToken::new()).await, 0);
    }
}

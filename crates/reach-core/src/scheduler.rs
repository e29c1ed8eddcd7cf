//! Periodic discovery-and-connect loop.
//!
//! ```text
//! Warming --(warm-up elapsed, first cycle)--> Ticking --(shutdown)--> Stopped
//!    \_____________________(shutdown)____________________________/
//! ```
//!
//! Every cycle runs as its own task under a child of the shutdown token, so
//! a slow cycle never holds back the next tick. A new tick closes the older
//! cycle's discovery batch; attempts that cycle already spawned keep running
//! until their own timeout.

use crate::discovery::RendezvousDiscovery;
use crate::events::{EventBus, SwarmEvent};
use crate::pool::ConnectionAttemptPool;
use crate::transport::TransportError;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Warming,
    Ticking,
    Stopped,
}

pub struct ConnectionScheduler {
    discovery: RendezvousDiscovery,
    pool: ConnectionAttemptPool,
    events: Arc<EventBus>,
    warmup: Duration,
    period: Duration,
    state: watch::Sender<SchedulerState>,
    next_cycle: u64,
    /// Batch scope of the most recent cycle
    open_batch: Option<CancellationToken>,
}

impl ConnectionScheduler {
    pub fn new(
        discovery: RendezvousDiscovery,
        pool: ConnectionAttemptPool,
        events: Arc<EventBus>,
        warmup: Duration,
        period: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Warming);
        Self {
            discovery,
            pool,
            events,
            warmup,
            period,
            state,
            next_cycle: 1,
            open_batch: None,
        }
    }

    /// Watch the scheduler's state. Stays `Warming` until `run` makes progress.
    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Drive the loop until `shutdown` is cancelled.
    ///
    /// Returns once every cycle it spawned has wound down.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let start = Instant::now();
        let mut ticker = interval_at(start + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        debug!("Scheduler warming up for {:?}", self.warmup);
        let warmed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.warmup) => true,
        };

        if warmed {
            self.spawn_cycle(&mut cycles, &shutdown);
            if self.warmup >= self.period {
                // The anchored tick already passed during warm-up
                ticker.reset();
            }
            self.state.send_replace(SchedulerState::Ticking);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.spawn_cycle(&mut cycles, &shutdown),
                    Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                error!("Discovery cycle panicked: {}", e);
                            }
                        }
                    }
                }
            }
        }

        info!("Stopping connection scheduler");
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("Discovery cycle panicked: {}", e);
                }
            }
        }
        self.state.send_replace(SchedulerState::Stopped);
        self.events.emit(SwarmEvent::Stopped);
    }

    /// Start the next cycle. The previous cycle stops reading its batch, but
    /// its in-flight attempts run on until their own timeout.
    fn spawn_cycle(&mut self, cycles: &mut JoinSet<()>, shutdown: &CancellationToken) {
        let cycle = self.next_cycle;
        self.next_cycle += 1;

        let attempt_scope = shutdown.child_token();
        let batch_scope = attempt_scope.child_token();
        if let Some(previous) = self.open_batch.replace(batch_scope.clone()) {
            if !previous.is_cancelled() {
                debug!("Closing discovery batch of cycle {}", cycle - 1);
                previous.cancel();
            }
        }

        cycles.spawn(run_cycle(
            cycle,
            self.discovery.clone(),
            self.pool.clone(),
            self.events.clone(),
            attempt_scope,
            batch_scope,
        ));
    }
}

/// One discovery pass: dial every candidate as it arrives, then wait for the
/// attempts to settle.
///
/// `batch_scope` ends the batch (next cycle or shutdown); `attempt_scope`
/// only ends with shutdown.
async fn run_cycle(
    cycle: u64,
    discovery: RendezvousDiscovery,
    pool: ConnectionAttemptPool,
    events: Arc<EventBus>,
    attempt_scope: CancellationToken,
    batch_scope: CancellationToken,
) {
    info!("Searching for other peers under tag {}...", discovery.tag());
    events.emit(SwarmEvent::CycleStarted { cycle });

    let mut batch = match discovery.discover(&batch_scope).await {
        Ok(batch) => batch,
        Err(TransportError::Cancelled) => {
            debug!("Cycle {} ended before discovery started", cycle);
            events.emit(SwarmEvent::CycleFinished {
                cycle,
                connected: 0,
                failed: 0,
            });
            return;
        }
        Err(e) => {
            warn!("Peer discovery failed: {}", e);
            events.emit(SwarmEvent::DiscoveryFailed {
                cycle,
                error: e.to_string(),
            });
            return;
        }
    };

    let mut attempts = pool.begin_cycle(attempt_scope);
    loop {
        tokio::select! {
            found = batch.next() => match found {
                Some(peer) => {
                    info!("Found peer: {}", peer);
                    events.emit(SwarmEvent::PeerFound {
                        cycle,
                        peer: peer.id(),
                    });
                    attempts.spawn(peer);
                }
                None => break,
            },
            // Reap finished attempts while the batch is still open
            Some(()) = attempts.join_next(), if attempts.in_flight() > 0 => {}
        }
    }
    drop(batch);

    let report = attempts.join().await;
    debug!(
        "Cycle {} finished: {} of {} attempts connected",
        cycle,
        report.connected.len(),
        report.attempted()
    );
    events.emit(SwarmEvent::CycleFinished {
        cycle,
        connected: report.connected.len(),
        failed: report.failed.len(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ConnectedCount;
    use crate::memory::{MemoryTransport, PeerBehavior};
    use crate::outcome::FailureCause;
    use crate::peer::{PeerAddress, PeerId};

    fn peer(n: u64) -> PeerAddress {
        PeerAddress::new(PeerId::try_from(n).unwrap(), format!("mem://peer-{}", n)).unwrap()
    }

    struct Harness {
        transport: Arc<MemoryTransport>,
        counter: Arc<ConnectedCount>,
        events: Arc<EventBus>,
        scheduler: ConnectionScheduler,
    }

    fn harness(warmup: Duration, period: Duration) -> Harness {
        let transport = Arc::new(MemoryTransport::new(PeerId::try_from(1).unwrap()));
        let counter = Arc::new(ConnectedCount::new());
        let events = Arc::new(EventBus::new());
        let pool = ConnectionAttemptPool::new(
            transport.clone(),
            counter.clone(),
            events.clone(),
            Duration::from_secs(10),
            None,
        );
        let discovery = RendezvousDiscovery::new(transport.clone(), "test-tag");
        let scheduler = ConnectionScheduler::new(discovery, pool, events.clone(), warmup, period);
        Harness {
            transport,
            counter,
            events,
            scheduler,
        }
    }

    fn default_harness() -> Harness {
        harness(Duration::from_secs(1), Duration::from_secs(30))
    }

    // ==========================================================================
    // Timing
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cycles_follow_warmup_then_period() {
        let h = default_harness();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.transport.discovery_calls(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.discovery_calls(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cycles_after_cancel() {
        let h = default_harness();
        let mut state = h.scheduler.state();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(*state.borrow_and_update(), SchedulerState::Ticking);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), SchedulerState::Stopped);

        let calls = h.transport.discovery_calls();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.transport.discovery_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_warmup_runs_no_cycle() {
        let h = default_harness();
        let state = h.scheduler.state();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(*state.borrow(), SchedulerState::Stopped);
        assert_eq!(h.transport.discovery_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_warmup_does_not_double_fire() {
        let h = harness(Duration::from_secs(40), Duration::from_secs(30));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(40_500)).await;
        assert_eq!(h.transport.discovery_calls(), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(h.transport.discovery_calls(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.transport.discovery_calls(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_ticks_are_delayed_not_burst() {
        let h = default_harness();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.transport.discovery_calls(), 1);

        // Jump past the ticks at 30, 60 and 90 in one go
        tokio::time::advance(Duration::from_secs(95)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.transport.discovery_calls(), 2);

        // The schedule restarts from the late tick at 96.5
        tokio::time::sleep(Duration::from_millis(29_400)).await;
        assert_eq!(h.transport.discovery_calls(), 2);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(h.transport.discovery_calls(), 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    // ==========================================================================
    // Cycle behavior
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_retried_next_tick() {
        let h = default_harness();
        h.transport.push_unavailable("rendezvous offline");
        h.transport.push_batch(vec![peer(2)]);
        h.transport.set_behavior(peer(2).id(), PeerBehavior::Accept);

        let mut rx = h.events.subscribe();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let failures: Vec<u64> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SwarmEvent::DiscoveryFailed { cycle, .. } => Some(cycle),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![1]);
        assert_eq!(h.counter.get(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.discovery_calls(), 2);
        assert!(h.transport.is_connected(peer(2).id()));
        assert_eq!(h.counter.get(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_cycle_stops_dialing() {
        let h = default_harness();
        let tx = h.transport.push_channel();
        h.transport.set_behavior(peer(2).id(), PeerBehavior::Hang);
        h.transport.set_behavior(peer(3).id(), PeerBehavior::Accept);

        let mut rx = h.events.subscribe();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        tx.send(peer(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.transport.dial_count(peer(2).id()), 1);

        shutdown.cancel();
        let _ = tx.send(peer(3));
        handle.await.unwrap();

        assert_eq!(h.transport.dial_count(peer(3).id()), 0);
        let seen = rx.drain();
        assert!(seen.contains(&SwarmEvent::ConnectFailed {
            peer: peer(2).id(),
            cause: FailureCause::Cancelled,
        }));
        assert_eq!(seen.last(), Some(&SwarmEvent::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_tick_closes_open_batch() {
        let h = harness(Duration::from_secs(1), Duration::from_secs(5));
        // None of these batches ever ends on its own
        let first = h.transport.push_channel();
        let second = h.transport.push_channel();
        let third = h.transport.push_channel();
        h.transport.set_behavior(peer(2).id(), PeerBehavior::Accept);
        let mut rx = h.events.subscribe();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        // Cycles at 1, 5 and 10
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(h.transport.discovery_calls(), 3);
        assert!(first.is_closed());
        assert!(second.is_closed());
        assert!(!third.is_closed());

        let finished: Vec<u64> = rx
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SwarmEvent::CycleFinished { cycle, .. } => Some(cycle),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec![1, 2]);

        // A late candidate on a closed batch is never dialed
        assert!(first.send(peer(2)).is_err());
        third.send(peer(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.transport.dial_count(peer(2).id()), 1);

        shutdown.cancel();
        handle.await.unwrap();
        assert!(third.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_batches_do_not_accumulate() {
        let h = harness(Duration::from_secs(1), Duration::from_secs(30));
        let senders: Vec<_> = (0..12).map(|_| h.transport.push_channel()).collect();
        let mut rx = h.events.subscribe();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(301)).await;
        let events = rx.drain();
        let started = events
            .iter()
            .filter(|e| matches!(e, SwarmEvent::CycleStarted { .. }))
            .count();
        let finished = events
            .iter()
            .filter(|e| matches!(e, SwarmEvent::CycleFinished { .. }))
            .count();
        assert_eq!(started, 11);
        assert_eq!(started - finished, 1);
        let open = senders.iter().filter(|tx| !tx.is_closed()).count();
        // The current batch plus the one no cycle has asked for yet
        assert_eq!(open, 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_outlives_its_closed_batch() {
        let h = harness(Duration::from_secs(1), Duration::from_secs(5));
        let first = h.transport.push_channel();
        let _second = h.transport.push_channel();
        h.transport
            .set_behavior(peer(2).id(), PeerBehavior::AcceptAfter(Duration::from_secs(8)));
        let mut rx = h.events.subscribe();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        first.send(peer(2)).unwrap();

        // Cycle 2 at 5s closes the first batch; the dial started at 1.5s
        // still completes at 9.5s, inside the attempt timeout
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(first.is_closed());
        assert_eq!(h.counter.get(), 0);

        tokio::time::sleep(Duration::from_millis(2400)).await;
        assert_eq!(h.counter.get(), 1);
        assert!(h.transport.is_connected(peer(2).id()));

        let events = rx.drain();
        assert!(events.contains(&SwarmEvent::CycleFinished {
            cycle: 1,
            connected: 1,
            failed: 0,
        }));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SwarmEvent::ConnectFailed { .. }))
        );

        shutdown.cancel();
        handle.await.unwrap();
    }
}

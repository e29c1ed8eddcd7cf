//! Concurrent, individually time-bounded connection attempts.
//!
//! Each discovered peer gets its own task. Tasks of one cycle live in that
//! cycle's `CycleAttempts` group so the cycle can reap, join or abort them as
//! a unit. A failed attempt only ever affects itself: it is reported and
//! dropped, never retried here and never propagated to the cycle.

use crate::counter::ConnectedCount;
use crate::events::{EventBus, SwarmEvent};
use crate::outcome::{ConnectionOutcome, FailureCause};
use crate::peer::{PeerAddress, PeerId};
use crate::transport::SwarmTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct AttemptContext {
    transport: Arc<dyn SwarmTransport>,
    counter: Arc<ConnectedCount>,
    events: Arc<EventBus>,
    attempt_timeout: Duration,
    max_in_flight: Option<usize>,
}

/// Spawns and tracks connection attempts.
///
/// Cheap to clone; clones share the transport, counter and event bus.
#[derive(Clone)]
pub struct ConnectionAttemptPool {
    ctx: Arc<AttemptContext>,
}

impl ConnectionAttemptPool {
    pub fn new(
        transport: Arc<dyn SwarmTransport>,
        counter: Arc<ConnectedCount>,
        events: Arc<EventBus>,
        attempt_timeout: Duration,
        max_in_flight: Option<usize>,
    ) -> Self {
        Self {
            ctx: Arc::new(AttemptContext {
                transport,
                counter,
                events,
                attempt_timeout,
                max_in_flight,
            }),
        }
    }

    /// Open a task group for one cycle; every attempt in it runs under `scope`.
    pub fn begin_cycle(&self, scope: CancellationToken) -> CycleAttempts {
        CycleAttempts {
            ctx: self.ctx.clone(),
            limiter: self.ctx.max_in_flight.map(|n| Arc::new(Semaphore::new(n))),
            scope,
            tasks: JoinSet::new(),
            report: CycleReport::default(),
        }
    }
}

/// Tally of the attempts one cycle spawned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub connected: Vec<PeerId>,
    pub failed: Vec<(PeerId, FailureCause)>,
    /// Tasks that panicked or were aborted before reporting
    pub lost: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: ConnectionOutcome) {
        match outcome {
            ConnectionOutcome::Connected { peer, .. } => self.connected.push(peer),
            ConnectionOutcome::Failed { peer, cause } => self.failed.push((peer, cause)),
        }
    }

    pub fn attempted(&self) -> usize {
        self.connected.len() + self.failed.len() + self.lost
    }
}

/// The attempts spawned by one cycle.
///
/// Dropping this aborts whatever is still running.
pub struct CycleAttempts {
    ctx: Arc<AttemptContext>,
    limiter: Option<Arc<Semaphore>>,
    scope: CancellationToken,
    tasks: JoinSet<ConnectionOutcome>,
    report: CycleReport,
}

impl CycleAttempts {
    /// Spawn one attempt for `peer` right away.
    ///
    /// Returns false (and spawns nothing) once the cycle's scope is cancelled.
    pub fn spawn(&mut self, peer: PeerAddress) -> bool {
        if self.scope.is_cancelled() {
            debug!("Not dialing {}: cycle cancelled", peer);
            return false;
        }
        let ctx = self.ctx.clone();
        let scope = self.scope.clone();
        let limiter = self.limiter.clone();
        self.tasks
            .spawn(async move { run_attempt(ctx, peer, scope, limiter).await });
        true
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for the next attempt to finish and fold it into the report.
    ///
    /// Returns None when nothing is in flight.
    pub async fn join_next(&mut self) -> Option<()> {
        let joined = self.tasks.join_next().await?;
        self.on_joined(joined);
        Some(())
    }

    /// Wait for every attempt still in flight.
    pub async fn join(mut self) -> CycleReport {
        while let Some(joined) = self.tasks.join_next().await {
            self.on_joined(joined);
        }
        std::mem::take(&mut self.report)
    }

    /// Abort every attempt still in flight. Established connections stay up.
    pub fn abort(&mut self) {
        self.tasks.abort_all();
    }

    fn on_joined(&mut self, joined: Result<ConnectionOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.report.record(outcome),
            Err(e) if e.is_cancelled() => self.report.lost += 1,
            Err(e) => {
                error!("Connection attempt task panicked: {}", e);
                self.report.lost += 1;
            }
        }
    }
}

/// One dial, bounded by the lesser of the cycle scope and the attempt timeout.
async fn run_attempt(
    ctx: Arc<AttemptContext>,
    peer: PeerAddress,
    scope: CancellationToken,
    limiter: Option<Arc<Semaphore>>,
) -> ConnectionOutcome {
    let _permit = match limiter {
        Some(semaphore) => tokio::select! {
            biased;
            _ = scope.cancelled() => return report_failure(&ctx, &peer, FailureCause::Cancelled),
            permit = semaphore.acquire_owned() => permit.ok(),
        },
        None => None,
    };

    let attempt_scope = scope.child_token();
    let result = tokio::select! {
        biased;
        _ = scope.cancelled() => Err(FailureCause::Cancelled),
        dialed = tokio::time::timeout(
            ctx.attempt_timeout,
            ctx.transport.connect(&peer, &attempt_scope),
        ) => match dialed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FailureCause::from(e)),
            Err(_) => Err(FailureCause::Timeout),
        },
    };
    // Release anything the transport still has waiting on this attempt
    attempt_scope.cancel();

    match result {
        Ok(()) => {
            let connected_count = ctx.counter.increment();
            info!("Connected to peer({}): {}", connected_count, peer);
            ctx.events.emit(SwarmEvent::PeerConnected {
                peer: peer.id(),
                connected_count,
            });
            ConnectionOutcome::Connected {
                peer: peer.id(),
                connected_count,
            }
        }
        Err(cause) => report_failure(&ctx, &peer, cause),
    }
}

fn report_failure(ctx: &AttemptContext, peer: &PeerAddress, cause: FailureCause) -> ConnectionOutcome {
    match cause {
        FailureCause::Cancelled => debug!("Connection to {} cancelled", peer),
        _ => warn!("Failed to connect peer {}: {}", peer, cause),
    }
    ctx.events.emit(SwarmEvent::ConnectFailed {
        peer: peer.id(),
        cause: cause.clone(),
    });
    ConnectionOutcome::Failed {
        peer: peer.id(),
        cause,
    }
}

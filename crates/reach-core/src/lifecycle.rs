//! Node lifecycle: construction, bootstrap, scheduler start and shutdown.

use crate::bootstrap::{BootstrapConnector, BootstrapSet};
use crate::config::{ConfigError, NodeConfig};
use crate::counter::ConnectedCount;
use crate::discovery::RendezvousDiscovery;
use crate::events::{EventBus, EventReceiver};
use crate::peer::PeerId;
use crate::pool::ConnectionAttemptPool;
use crate::scheduler::{ConnectionScheduler, SchedulerState};
use crate::transport::SwarmTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Connection scheduler already started")]
    AlreadyStarted,
    #[error("Node is stopped")]
    Stopped,
}

/// An outbound-only swarm participant.
///
/// Owns the top-level cancellation scope. Every cycle and attempt runs under
/// a token derived from it, so `stop` reaches all of them.
pub struct Node {
    config: NodeConfig,
    transport: Arc<dyn SwarmTransport>,
    bootstrap_set: BootstrapSet,
    counter: Arc<ConnectedCount>,
    events: Arc<EventBus>,
    pool: ConnectionAttemptPool,
    shutdown: CancellationToken,
    stop_requested: AtomicBool,
    scheduler: Mutex<Option<ConnectionScheduler>>,
    task: Mutex<Option<JoinHandle<()>>>,
    state: watch::Receiver<SchedulerState>,
}

impl Node {
    /// Build a node. Fails only when the configuration is unusable.
    pub fn new(config: NodeConfig, transport: Arc<dyn SwarmTransport>) -> Result<Self, NodeError> {
        config.validate()?;

        let bootstrap_set = BootstrapSet::parse(&config.bootstrap_peers);
        let counter = Arc::new(ConnectedCount::new());
        let events = Arc::new(EventBus::new());
        let pool = ConnectionAttemptPool::new(
            transport.clone(),
            counter.clone(),
            events.clone(),
            config.attempt_timeout(),
            config.max_in_flight,
        );
        let discovery = RendezvousDiscovery::new(transport.clone(), config.rendezvous_tag.clone());
        let scheduler = ConnectionScheduler::new(
            discovery,
            pool.clone(),
            events.clone(),
            config.warmup(),
            config.tick_period(),
        );
        let state = scheduler.state();

        info!(
            "Node {} created ({} bootstrap peers, tag {})",
            transport.local_id(),
            bootstrap_set.len(),
            config.rendezvous_tag
        );

        Ok(Self {
            config,
            transport,
            bootstrap_set,
            counter,
            events,
            pool,
            shutdown: CancellationToken::new(),
            stop_requested: AtomicBool::new(false),
            scheduler: Mutex::new(Some(scheduler)),
            task: Mutex::new(None),
            state,
        })
    }

    /// `new`, then `bootstrap`, then `start`.
    pub async fn launch(
        config: NodeConfig,
        transport: Arc<dyn SwarmTransport>,
    ) -> Result<Self, NodeError> {
        let node = Self::new(config, transport)?;
        node.bootstrap().await?;
        node.start()?;
        Ok(node)
    }

    /// Dial every bootstrap peer once. Returns how many were reached.
    pub async fn bootstrap(&self) -> Result<usize, NodeError> {
        if self.shutdown.is_cancelled() {
            return Err(NodeError::Stopped);
        }
        let connector = BootstrapConnector::new(self.pool.clone(), self.events.clone());
        Ok(connector.run(&self.bootstrap_set, &self.shutdown).await)
    }

    /// Spawn the connection scheduler. Allowed once per node.
    pub fn start(&self) -> Result<(), NodeError> {
        if self.shutdown.is_cancelled() {
            return Err(NodeError::Stopped);
        }
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        let handle = tokio::spawn(scheduler.run(self.shutdown.clone()));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("Connection scheduler started");
        Ok(())
    }

    /// Request termination. Returns immediately; repeated calls do nothing.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutdown requested");
        self.shutdown.cancel();
    }

    /// Stop and wait until the scheduler reports `Stopped`.
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Connection scheduler task failed: {}", e);
            }
            return;
        }

        // Never started: settle the scheduler so its state still ends in Stopped
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.run(self.shutdown.clone()).await;
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn bootstrap_set(&self) -> &BootstrapSet {
        &self.bootstrap_set
    }

    /// Successful connections over the node's lifetime.
    pub fn connected_count(&self) -> u64 {
        self.counter.get()
    }

    pub fn state(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Receive the node's progress events from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

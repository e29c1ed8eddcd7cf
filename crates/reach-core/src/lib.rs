//! reach-core: peer discovery and connection maintenance for outbound-only nodes.
//!
//! This crate provides:
//! - A one-shot bootstrap pass against well-known peers
//! - A periodic scheduler that discovers peers by rendezvous tag and dials them
//! - Concurrent, individually time-bounded connection attempts
//! - Node lifecycle with a single idempotent stop
//! - The `SwarmTransport` trait abstraction and an in-memory implementation

pub mod bootstrap;
pub mod config;
pub mod counter;
pub mod discovery;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod outcome;
pub mod peer;
pub mod pool;
pub mod scheduler;
pub mod transport;

pub use bootstrap::{BootstrapConnector, BootstrapSet, SkippedEntry};
pub use config::{ConfigError, NodeConfig};
pub use counter::ConnectedCount;
pub use discovery::{DiscoveryBatch, RendezvousDiscovery};
pub use events::{DEFAULT_EVENT_CAPACITY, EventBus, EventReceiver, SwarmEvent};
pub use lifecycle::{Node, NodeError};
pub use memory::{MemoryTransport, PeerBehavior};
pub use outcome::{ConnectionOutcome, FailureCause};
pub use peer::{PeerAddress, PeerAddressError, PeerId, PeerIdError};
pub use pool::{ConnectionAttemptPool, CycleAttempts, CycleReport};
pub use scheduler::{ConnectionScheduler, SchedulerState};
pub use transport::{PeerStream, SwarmTransport, TransportError};

//! SwarmTransport trait: the dial and discovery capability the node consumes.
//!
//! Implementations:
//! - `reach-daemon`: WebSocket dial + WebSocket rendezvous service
//! - `memory::MemoryTransport`: scripted, in-process (tests)

use crate::peer::{PeerAddress, PeerId};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote end actively rejected the connection.
    #[error("Connection refused: {0}")]
    Refused(String),

    /// The remote answered as a different identity than expected.
    #[error("Identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: PeerId, actual: String },

    /// The governing scope was cancelled while the operation was pending.
    #[error("Operation cancelled")]
    Cancelled,

    /// The discovery mechanism could not be reached.
    #[error("Discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Lazy, single-pass sequence of candidates from one discovery call.
pub type PeerStream = BoxStream<'static, PeerAddress>;

/// Dial + discovery capability of the local node.
///
/// Every suspending operation takes the cancellation scope it runs under.
#[async_trait]
pub trait SwarmTransport: Send + Sync + 'static {
    /// Our own stable identity.
    fn local_id(&self) -> PeerId;

    /// Open one outbound connection to `peer`.
    ///
    /// Implementations should return promptly with `Cancelled` once `scope`
    /// fires. The caller bounds the attempt with its own timeout as well.
    async fn connect(&self, peer: &PeerAddress, scope: &CancellationToken) -> Result<()>;

    /// Start looking up peers advertised under `tag`.
    ///
    /// Failing here means discovery could not start at all. Once started,
    /// peers are pushed through the returned stream as they are learned.
    async fn find_peers(&self, tag: &str, scope: CancellationToken) -> Result<PeerStream>;
}

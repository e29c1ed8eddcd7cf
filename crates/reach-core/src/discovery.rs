//! Rendezvous discovery adapter.
//!
//! Wraps the transport's `find_peers` so that every batch:
//! - ends as soon as the governing scope is cancelled
//! - never yields the local node itself

use crate::peer::PeerAddress;
use crate::transport::{PeerStream, Result, SwarmTransport, TransportError};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Candidates produced by one discovery call.
///
/// Single-pass and possibly unbounded. Dropping it releases the underlying
/// lookup; a later cycle always starts a fresh one.
pub struct DiscoveryBatch {
    inner: PeerStream,
}

impl Stream for DiscoveryBatch {
    type Item = PeerAddress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[derive(Clone)]
pub struct RendezvousDiscovery {
    transport: Arc<dyn SwarmTransport>,
    tag: String,
}

impl RendezvousDiscovery {
    pub fn new(transport: Arc<dyn SwarmTransport>, tag: impl Into<String>) -> Self {
        Self {
            transport,
            tag: tag.into(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Start one lookup under `scope`.
    ///
    /// An error means the lookup never started; it is the caller's cycle that
    /// fails, nothing more.
    pub async fn discover(&self, scope: &CancellationToken) -> Result<DiscoveryBatch> {
        let started = tokio::select! {
            biased;
            _ = scope.cancelled() => return Err(TransportError::Cancelled),
            started = self.transport.find_peers(&self.tag, scope.clone()) => started,
        };
        let stream = started?;
        debug!("Discovery started for tag {}", self.tag);

        let local_id = self.transport.local_id();
        let inner = stream
            .take_until(scope.clone().cancelled_owned())
            .filter(move |peer| futures::future::ready(peer.id() != local_id))
            .boxed();

        Ok(DiscoveryBatch { inner })
    }
}

//! The daemon's run sequence: bootstrap, start, wait for shutdown, tear down.

use std::future::Future;

use reach_core::{Node, NodeError};
use tracing::info;

use crate::transport::WsTransport;

/// Run `node` until `shutdown` completes.
///
/// `shutdown` is honoured during the bootstrap pass too: an interrupt there
/// stops the node without ever starting the scheduler. Links are closed
/// before returning either way.
pub async fn run_node(
    node: &Node,
    transport: &WsTransport,
    shutdown: impl Future<Output = ()>,
) -> Result<(), NodeError> {
    tokio::pin!(shutdown);

    let bootstrapped = tokio::select! {
        biased;
        _ = &mut shutdown => None,
        reached = node.bootstrap() => Some(reached),
    };

    let result = match bootstrapped {
        None => {
            info!("Shutdown requested during bootstrap");
            node.stop();
            Ok(())
        }
        Some(Err(e)) => Err(e),
        Some(Ok(_)) => match node.start() {
            Ok(()) => {
                shutdown.await;
                info!("Shutdown requested");
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    node.shutdown().await;
    transport.close_all().await;
    result
}

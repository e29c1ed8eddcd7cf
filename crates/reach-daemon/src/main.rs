//! reach-daemon: outbound-only swarm node.
//!
//! Dials the configured bootstrap peers once, then keeps looking for more
//! peers through a rendezvous service until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use reach_core::{Node, SwarmEvent};
use reach_daemon::{DaemonConfig, Overrides, WsTransport, run_node};

#[derive(Parser, Debug)]
#[command(name = "reach-daemon")]
#[command(about = "Outbound-only peer discovery and connection daemon")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bootstrap peer address (`<endpoint>/p2p/<peer-id>`), repeatable
    #[arg(short, long)]
    bootstrap: Vec<String>,

    /// WebSocket URL of the rendezvous service
    #[arg(short, long)]
    rendezvous: Option<String>,

    /// Rendezvous tag to look peers up under
    #[arg(long)]
    tag: Option<String>,

    /// Peer ID (generated if not provided)
    #[arg(long)]
    peer_id: Option<String>,

    /// Per-attempt connection timeout in seconds
    #[arg(long)]
    attempt_timeout: Option<u64>,

    /// Seconds between discovery cycles
    #[arg(long)]
    tick_period: Option<u64>,

    /// Max concurrent dials per cycle
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            bootstrap: self.bootstrap.clone(),
            rendezvous_url: self.rendezvous.clone(),
            tag: self.tag.clone(),
            peer_id: self.peer_id.clone(),
            attempt_timeout_secs: self.attempt_timeout,
            tick_period_secs: self.tick_period,
            max_in_flight: self.max_in_flight,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,reach_daemon=debug,reach_core=debug"
    } else {
        "info,reach_daemon=info,reach_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting reach-daemon");

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    config.apply(args.overrides());

    let peer_id = config.resolve_peer_id()?;
    info!("Peer ID: {}", peer_id);
    match &config.rendezvous_url {
        Some(url) => info!("Rendezvous service: {}", url),
        None => warn!("No rendezvous service configured; only bootstrap peers will be dialed"),
    }

    let transport = Arc::new(WsTransport::new(peer_id, config.rendezvous_url.clone()));
    let node = Node::new(config.node, transport.clone()).context("Failed to create node")?;

    info!("Looking for peers under tag {}", node.config().rendezvous_tag);

    let mut progress = node.subscribe();
    tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            match event {
                SwarmEvent::CycleFinished {
                    cycle,
                    connected,
                    failed,
                } => debug!(
                    "Cycle {} done: {} connected, {} failed",
                    cycle, connected, failed
                ),
                SwarmEvent::BootstrapFinished { attempted, reached }
                    if attempted > 0 && reached == 0 =>
                {
                    warn!("None of the {} bootstrap peers could be reached", attempted)
                }
                _ => {}
            }
        }
    });

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };
    run_node(&node, &transport, ctrl_c).await?;

    info!(
        "Stopped after {} successful connections",
        node.connected_count()
    );
    Ok(())
}

//! Daemon configuration: a JSON file plus command-line overrides.

use std::path::Path;

use anyhow::{Context, Result};
use reach_core::{NodeConfig, PeerId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Connectivity loop settings
    #[serde(flatten)]
    pub node: NodeConfig,

    /// WebSocket URL of the rendezvous service (discovery is skipped if unset)
    #[serde(default)]
    pub rendezvous_url: Option<String>,

    /// Our peer ID (generated if not set)
    #[serde(default)]
    pub peer_id: Option<String>,
}

/// Values given on the command line. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bootstrap: Vec<String>,
    pub rendezvous_url: Option<String>,
    pub tag: Option<String>,
    pub peer_id: Option<String>,
    pub attempt_timeout_secs: Option<u64>,
    pub tick_period_secs: Option<u64>,
    pub max_in_flight: Option<usize>,
}

impl DaemonConfig {
    /// Load configuration from a JSON file. A missing file means defaults.
    pub fn load(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
        let config: DaemonConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", config_file))?;
        tracing::info!("Loaded configuration from {:?}", config_file);
        Ok(config)
    }

    /// Apply command-line values. Bootstrap peers given on the command line
    /// are added after the ones from the file.
    pub fn apply(&mut self, overrides: Overrides) {
        self.node.bootstrap_peers.extend(overrides.bootstrap);
        if let Some(url) = overrides.rendezvous_url {
            self.rendezvous_url = Some(url);
        }
        if let Some(tag) = overrides.tag {
            self.node.rendezvous_tag = tag;
        }
        if let Some(peer_id) = overrides.peer_id {
            self.peer_id = Some(peer_id);
        }
        if let Some(secs) = overrides.attempt_timeout_secs {
            self.node.attempt_timeout_secs = secs;
        }
        if let Some(secs) = overrides.tick_period_secs {
            self.node.tick_period_secs = secs;
        }
        if let Some(n) = overrides.max_in_flight {
            self.node.max_in_flight = Some(n);
        }
    }

    /// The configured peer ID, or a fresh random one.
    pub fn resolve_peer_id(&self) -> Result<PeerId> {
        match &self.peer_id {
            Some(id) => id
                .parse::<PeerId>()
                .with_context(|| format!("Invalid peer ID: {:?}", id)),
            None => {
                let id = PeerId::generate();
                tracing::info!("Generated peer ID: {}", id);
                Ok(id)
            }
        }
    }
}

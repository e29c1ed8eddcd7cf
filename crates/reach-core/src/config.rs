//! Node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Rendezvous tag cannot be empty")]
    EmptyTag,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("max_in_flight must be greater than zero when set")]
    ZeroInFlight,
}

/// Static configuration for one node lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Well-known peers contacted once at startup (`<endpoint>/p2p/<peer-id>`)
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Namespace peers advertise under
    #[serde(default = "default_rendezvous_tag")]
    pub rendezvous_tag: String,

    /// Delay before the first discovery cycle (default: 1s)
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,

    /// Period between discovery cycles (default: 30s)
    #[serde(default = "default_tick_period_secs")]
    pub tick_period_secs: u64,

    /// Upper bound for one outbound connection attempt (default: 10s)
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Cap on concurrently dialing attempts per cycle (None = unbounded)
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

fn default_rendezvous_tag() -> String {
    "reach-rendezvous".to_string()
}

fn default_warmup_ms() -> u64 {
    1000
}

fn default_tick_period_secs() -> u64 {
    30
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bootstrap_peers: Vec::new(),
            rendezvous_tag: default_rendezvous_tag(),
            warmup_ms: default_warmup_ms(),
            tick_period_secs: default_tick_period_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            max_in_flight: None,
        }
    }
}

impl NodeConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_period_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Reject values the scheduler cannot run with.
    ///
    /// A zero warm-up is allowed (first cycle runs immediately).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rendezvous_tag.trim().is_empty() {
            return Err(ConfigError::EmptyTag);
        }
        if self.tick_period_secs == 0 {
            return Err(ConfigError::ZeroDuration("tick_period_secs"));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("attempt_timeout_secs"));
        }
        if self.max_in_flight == Some(0) {
            return Err(ConfigError::ZeroInFlight);
        }
        Ok(())
    }
}

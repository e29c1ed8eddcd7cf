//! Per-attempt connection results.

use crate::peer::PeerId;
use crate::transport::TransportError;
use serde::Serialize;
use std::fmt;

/// Why a single connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FailureCause {
    /// The per-attempt timeout elapsed first.
    Timeout,
    /// The remote rejected us (or answered as someone else).
    Refused(String),
    /// The governing scope was cancelled.
    Cancelled,
}

impl From<TransportError> for FailureCause {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => FailureCause::Cancelled,
            other => FailureCause::Refused(other.to_string()),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Timeout => write!(f, "timed out"),
            FailureCause::Refused(reason) => write!(f, "refused ({})", reason),
            FailureCause::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one attempt, tagged with the peer it was for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Connected; `connected_count` is the counter value after our increment.
    Connected { peer: PeerId, connected_count: u64 },
    Failed { peer: PeerId, cause: FailureCause },
}

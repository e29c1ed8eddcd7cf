//! Process-lifetime count of successful outbound connections.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic connection counter shared by every attempt task.
///
/// Owned by the lifecycle controller and handed to the attempt pool as an
/// `Arc<ConnectedCount>`. There is no decrement.
#[derive(Debug, Default)]
pub struct ConnectedCount(AtomicU64);

impl ConnectedCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one success and return the new total.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

//! In-memory liveness tracking.
//!
//! Records the last authenticated contact per instance. This map — not the
//! persisted status column, which can lag — is the sole source of truth for
//! whether a command may be dispatched to an instance. State is process-local
//! and lost on restart: every instance then appears disconnected until its
//! next heartbeat.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// An instance is considered connected if it has contacted the server within
/// this window.
pub const ACTIVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct LivenessTracker {
    last_contact: RwLock<HashMap<String, Instant>>,
    active_timeout: Duration,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(ACTIVE_TIMEOUT)
    }
}

impl LivenessTracker {
    pub fn new(active_timeout: Duration) -> Self {
        Self {
            last_contact: RwLock::new(HashMap::new()),
            active_timeout,
        }
    }

    /// Record an authenticated contact. Called on every successful
    /// authenticated RPC.
    pub async fn touch(&self, instance_id: &str) {
        self.last_contact
            .write()
            .await
            .insert(instance_id.to_string(), Instant::now());
    }

    /// Whether the instance has contacted the server within the active
    /// window. No record means not connected.
    pub async fn is_connected(&self, instance_id: &str) -> bool {
        self.last_contact
            .read()
            .await
            .get(instance_id)
            .is_some_and(|last| last.elapsed() <= self.active_timeout)
    }

    /// Number of instances currently tracked (stale entries included; they
    /// age out of `is_connected` naturally and are harmless).
    pub async fn tracked_count(&self) -> usize {
        self.last_contact.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connected_immediately_after_touch() {
        let tracker = LivenessTracker::default();
        tracker.touch("ha-1a2b").await;
        assert!(tracker.is_connected("ha-1a2b").await);
    }

    #[tokio::test]
    async fn unknown_instance_is_not_connected() {
        let tracker = LivenessTracker::default();
        assert!(!tracker.is_connected("ha-ffff").await);
    }

    #[tokio::test]
    async fn disconnects_after_active_window_elapses() {
        let tracker = LivenessTracker::new(Duration::from_millis(10));
        tracker.touch("ha-1a2b").await;
        assert!(tracker.is_connected("ha-1a2b").await);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!tracker.is_connected("ha-1a2b").await);

        // A fresh touch reconnects.
        tracker.touch("ha-1a2b").await;
        assert!(tracker.is_connected("ha-1a2b").await);
    }

    #[tokio::test]
    async fn stale_entries_remain_tracked() {
        let tracker = LivenessTracker::new(Duration::from_millis(1));
        tracker.touch("ha-1a2b").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!tracker.is_connected("ha-1a2b").await);
        assert_eq!(tracker.tracked_count().await, 1);
    }
}

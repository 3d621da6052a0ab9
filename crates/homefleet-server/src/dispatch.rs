//! Update-trigger dispatch and correlation.
//!
//! Devices can only call in, never be called back, so a "trigger update"
//! command is delivered opportunistically in the device's next heartbeat
//! response and completed by a later device-initiated result call. This
//! module holds the pending trigger per instance and correlates the three
//! legs: operator request, heartbeat delivery, and device completion.
//!
//! Delivery is at-least-once: the pending entry stays in place across
//! repeated heartbeats until the device reports a result or the request
//! times out; the device de-duplicates by update type/slug.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};

use crate::liveness::LivenessTracker;

/// How long an operator request waits for the device to report a result.
pub const TRIGGER_TIMEOUT: Duration = Duration::from_secs(60);

/// The update descriptor delivered in a heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdateDescriptor {
    pub update_type: String,
    pub addon_slug: String,
}

/// Result of a trigger request, as reported by the device (or synthesized on
/// timeout).
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl TriggerOutcome {
    fn timed_out() -> Self {
        Self {
            success: false,
            error: Some("Update request timed out".to_string()),
            message: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Instance not connected")]
    NotConnected,

    /// A second request while one is outstanding is rejected rather than
    /// replacing the first, so the first caller's waiting future is never
    /// silently abandoned.
    #[error("An update trigger is already pending for this instance")]
    AlreadyPending,
}

struct PendingEntry {
    /// Distinguishes this request from any successor for the same instance,
    /// so a stale timeout cleanup cannot remove an entry it does not own.
    request_id: u64,
    descriptor: PendingUpdateDescriptor,
    done: oneshot::Sender<TriggerOutcome>,
}

/// Correlates operator trigger requests with device heartbeats and result
/// reports. At most one trigger is pending per instance.
pub struct UpdateDispatcher {
    liveness: Arc<LivenessTracker>,
    pending: RwLock<HashMap<String, PendingEntry>>,
    next_request_id: AtomicU64,
    completion_timeout: Duration,
}

impl UpdateDispatcher {
    pub fn new(liveness: Arc<LivenessTracker>, completion_timeout: Duration) -> Self {
        Self {
            liveness,
            pending: RwLock::new(HashMap::new()),
            next_request_id: AtomicU64::new(0),
            completion_timeout,
        }
    }

    /// Request an update on a connected instance and wait for the device to
    /// report a result.
    ///
    /// Fails immediately if the instance is not connected or a trigger is
    /// already pending for it. Otherwise resolves exactly once: with the
    /// device-reported outcome, or with a timeout failure after the
    /// completion window elapses.
    pub async fn request_update(
        &self,
        instance_id: &str,
        update_type: &str,
        addon_slug: &str,
    ) -> Result<TriggerOutcome, DispatchError> {
        if !self.liveness.is_connected(instance_id).await {
            return Err(DispatchError::NotConnected);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut pending = self.pending.write().await;
            if pending.contains_key(instance_id) {
                return Err(DispatchError::AlreadyPending);
            }
            pending.insert(
                instance_id.to_string(),
                PendingEntry {
                    request_id,
                    descriptor: PendingUpdateDescriptor {
                        update_type: update_type.to_string(),
                        addon_slug: addon_slug.to_string(),
                    },
                    done: done_tx,
                },
            );
        }

        info!(instance_id, update_type, addon_slug, "Update trigger queued");

        match tokio::time::timeout(self.completion_timeout, done_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // Sender dropped without a result; treat like a timeout.
            Ok(Err(_)) => Ok(TriggerOutcome::timed_out()),
            Err(_elapsed) => {
                // If completion won the race the entry is already gone (and a
                // successor request may occupy the slot by now); only remove
                // the entry this request created.
                self.remove_if_current(instance_id, request_id).await;
                debug!(instance_id, "Update trigger timed out");
                Ok(TriggerOutcome::timed_out())
            }
        }
    }

    /// Remove the instance's pending entry only if it still belongs to the
    /// given request.
    async fn remove_if_current(&self, instance_id: &str, request_id: u64) {
        let mut pending = self.pending.write().await;
        if pending
            .get(instance_id)
            .is_some_and(|entry| entry.request_id == request_id)
        {
            pending.remove(instance_id);
        }
    }

    /// The pending descriptor for an instance, if any. Does not remove the
    /// entry; delivery repeats until completion or timeout.
    pub async fn pending_for(&self, instance_id: &str) -> Option<PendingUpdateDescriptor> {
        self.pending
            .read()
            .await
            .get(instance_id)
            .map(|entry| entry.descriptor.clone())
    }

    /// Resolve the pending trigger for an instance with the device-reported
    /// outcome. Returns `false` if nothing was pending (already completed or
    /// timed out).
    pub async fn complete(&self, instance_id: &str, outcome: TriggerOutcome) -> bool {
        let entry = self.pending.write().await.remove(instance_id);
        match entry {
            Some(entry) => {
                // Send fails only if the requester already gave up; the entry
                // is gone either way, so resolution stays exactly-once.
                let _ = entry.done.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Number of triggers currently pending.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

//! Fixed-window rate limiting for unauthenticated entry points.
//!
//! Enroll and RefreshToken are the only RPCs reachable without a valid
//! access token, and the only ones that need brute-force protection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Per-method limit applied to a fixed window.
#[derive(Debug, Clone, Copy)]
pub struct LimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

/// 5 enroll attempts per peer per minute.
pub const ENROLL_POLICY: LimitPolicy = LimitPolicy {
    limit: 5,
    window: Duration::from_secs(60),
};

/// 20 refresh attempts per peer per minute.
pub const REFRESH_POLICY: LimitPolicy = LimitPolicy {
    limit: 20,
    window: Duration::from_secs(60),
};

struct Bucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window counters keyed by (operation, caller identity).
#[derive(Default)]
pub struct FixedWindowLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one request against the key's window. Returns `false` once the
    /// window's limit is exhausted; a fresh window resets the count.
    pub async fn consume(&self, key: &str, policy: LimitPolicy) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        match buckets.get_mut(key) {
            Some(bucket) if now.duration_since(bucket.window_start) < policy.window => {
                if bucket.count >= policy.limit {
                    return false;
                }
                bucket.count += 1;
                true
            }
            _ => {
                buckets.insert(
                    key.to_string(),
                    Bucket {
                        window_start: now,
                        count: 1,
                    },
                );
                true
            }
        }
    }
}

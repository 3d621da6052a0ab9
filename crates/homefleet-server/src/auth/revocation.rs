//! Process-local access-token revocation.
//!
//! Access tokens are stateless, so explicit revocation is only tracked for
//! the small subset whose owning refresh token was rotated before the access
//! token's natural expiry. Entries evict lazily once the token would have
//! expired anyway.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::storage::unix_timestamp;

#[derive(Debug, Clone)]
struct PairedAccess {
    jti: String,
    /// Unix seconds.
    expires_at: i64,
}

/// Revoked-jti set plus the refresh-token-to-access-token pairing that feeds
/// it on rotation.
///
/// Both maps are plain mutex-guarded so lookups stay synchronous; the access
/// verification path must not await.
#[derive(Default)]
pub struct RevocationSet {
    /// jti -> natural expiry (Unix seconds).
    revoked: Mutex<HashMap<String, i64>>,
    /// refresh record ID -> the access token issued alongside it.
    pairings: Mutex<HashMap<String, PairedAccess>>,
}

impl RevocationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke an access token by jti until its natural expiry.
    pub fn revoke(&self, jti: &str, expires_at: i64) {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(jti.to_string(), expires_at);
    }

    /// Whether a jti is currently revoked. Entries past their natural expiry
    /// are evicted on lookup.
    pub fn is_revoked(&self, jti: &str) -> bool {
        let mut revoked = self.revoked.lock().unwrap_or_else(PoisonError::into_inner);
        match revoked.get(jti) {
            None => false,
            Some(&expires_at) if expires_at <= unix_timestamp() => {
                revoked.remove(jti);
                false
            }
            Some(_) => true,
        }
    }

    /// Remember which access token was issued alongside a refresh token, so
    /// rotating the refresh token can revoke the access token too.
    pub fn track_pairing(&self, refresh_id: &str, jti: &str, expires_at: i64) {
        self.pairings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                refresh_id.to_string(),
                PairedAccess {
                    jti: jti.to_string(),
                    expires_at,
                },
            );
    }

    /// Revoke the access token paired with a refresh token, if one is tracked.
    pub fn revoke_for_refresh(&self, refresh_id: &str) {
        let paired = self
            .pairings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(refresh_id);
        if let Some(paired) = paired {
            self.revoke(&paired.jti, paired.expires_at);
        }
    }
}

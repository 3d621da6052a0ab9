//! JWT claims structure for Homefleet access tokens.

use serde::{Deserialize, Serialize};

/// Claims embedded in device access tokens.
///
/// Every field is required; a token missing any of them fails
/// deserialization and therefore verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (instance ID).
    pub sub: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
    /// Token ID (unique per token, targeted by revocation).
    pub jti: String,
}

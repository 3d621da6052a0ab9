//! Access-token issuance and validation.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use super::claims::Claims;
use crate::storage::unix_timestamp;

/// A freshly minted access token together with its identifying metadata.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub jti: String,
}

/// Signs and validates short-lived access tokens.
///
/// Issuance is a pure function of the instance ID, the signing key, and the
/// clock; no state is kept here.
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: i64,
}

impl TokenSigner {
    /// Create a new `TokenSigner` with the given secret.
    pub fn new(secret: &[u8], access_ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs,
        }
    }

    /// Issue an access token for the given instance.
    pub fn issue(
        &self,
        instance_id: &str,
    ) -> Result<IssuedAccessToken, jsonwebtoken::errors::Error> {
        let now = unix_timestamp();
        let exp = now + self.access_ttl_secs;

        let claims = Claims {
            sub: instance_id.to_string(),
            iat: now,
            exp,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(IssuedAccessToken {
            token,
            expires_at: exp,
            jti: claims.jti,
        })
    }

    /// Validate a token's signature and expiry and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data =
            jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }

    /// Hash an opaque refresh secret for storage (raw secrets are never stored).
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Generate an opaque refresh secret: 32 bytes of CSPRNG entropy, hex-encoded.
pub fn generate_refresh_secret() -> String {
    use rand::RngCore;
    use std::fmt::Write;

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);

    bytes.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

//! Credential service: access-token issuance/verification plus refresh-token
//! storage, validation, and rotation.
//!
//! Access tokens are stateless and self-verifying for the hot path; refresh
//! tokens are the stateful root of trust and are rotated on every use, so a
//! stolen, already-used refresh token fails validation as soon as the chain
//! has moved past it.

use tracing::warn;

use crate::storage::{unix_timestamp_ms, DatabaseError, FleetDatabase, RefreshTokenRecord};

use super::claims::Claims;
use super::jwt::{generate_refresh_secret, TokenSigner};
use super::revocation::RevocationSet;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// A matched access/refresh token pair handed to a device.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    /// Raw refresh secret; returned to the device exactly once.
    pub refresh_token: String,
    /// Unix seconds.
    pub access_token_expires_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Token creation failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub struct CredentialService {
    db: FleetDatabase,
    signer: TokenSigner,
    revocation: RevocationSet,
    /// `None` means refresh tokens do not expire by time.
    refresh_ttl_days: Option<i64>,
}

impl CredentialService {
    pub fn new(db: FleetDatabase, signer: TokenSigner, refresh_ttl_days: Option<i64>) -> Self {
        Self {
            db,
            signer,
            revocation: RevocationSet::new(),
            refresh_ttl_days,
        }
    }

    /// Verify an access token: signature, expiry, and the revocation set.
    ///
    /// Returns `None` on any failure; callers never see the underlying error.
    /// Synchronous so it can run on every authenticated RPC without awaiting.
    pub fn verify_access_token(&self, token: &str) -> Option<Claims> {
        let claims = self.signer.validate(token).ok()?;
        if self.revocation.is_revoked(&claims.jti) {
            return None;
        }
        Some(claims)
    }

    /// Issue a fresh access/refresh pair for an instance and persist the
    /// refresh-token hash. The pairing is tracked so a later rotation can
    /// revoke this access token early.
    pub async fn issue_session(&self, instance_id: &str) -> Result<SessionTokens, CredentialError> {
        let access = self.signer.issue(instance_id)?;

        let secret = generate_refresh_secret();
        let record = self
            .db
            .create_refresh_token(
                &uuid::Uuid::new_v4().to_string(),
                instance_id,
                &TokenSigner::hash_secret(&secret),
                self.refresh_expires_at(),
            )
            .await?;

        self.revocation
            .track_pairing(&record.id, &access.jti, access.expires_at);

        Ok(SessionTokens {
            access_token: access.token,
            refresh_token: secret,
            access_token_expires_at: access.expires_at,
        })
    }

    /// Look up an active refresh token by its raw secret. Stamps last-used on
    /// success. Does not consume or rotate.
    pub async fn validate_refresh_token(
        &self,
        secret: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        self.db
            .get_active_refresh_token_by_hash(&TokenSigner::hash_secret(secret))
            .await
    }

    /// Rotate a validated refresh token: revoke the old refresh record, issue
    /// a new session, and revoke the old record's paired access token.
    ///
    /// The old record is revoked in the same transaction that stores its
    /// successor, and only while still unrevoked, so two racing rotations of
    /// the same record produce exactly one new chain link. The loser gets
    /// `None` and must be treated as an invalid refresh token.
    pub async fn rotate_session(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<Option<SessionTokens>, CredentialError> {
        let access = self.signer.issue(&record.instance_id)?;
        let secret = generate_refresh_secret();
        let Some(new_record) = self
            .db
            .rotate_refresh_token(
                &record.id,
                &uuid::Uuid::new_v4().to_string(),
                &record.instance_id,
                &TokenSigner::hash_secret(&secret),
                self.refresh_expires_at(),
            )
            .await?
        else {
            return Ok(None);
        };

        self.revocation.revoke_for_refresh(&record.id);
        self.revocation
            .track_pairing(&new_record.id, &access.jti, access.expires_at);

        Ok(Some(SessionTokens {
            access_token: access.token,
            refresh_token: secret,
            access_token_expires_at: access.expires_at,
        }))
    }

    /// Explicitly revoke a refresh token and its paired access token.
    pub async fn revoke_session(&self, record: &RefreshTokenRecord) -> Result<(), DatabaseError> {
        self.revocation.revoke_for_refresh(&record.id);
        if let Err(e) = self.db.revoke_refresh_token(&record.id).await {
            warn!(refresh_id = %record.id, error = %e, "Failed to revoke refresh token");
            return Err(e);
        }
        Ok(())
    }

    fn refresh_expires_at(&self) -> Option<i64> {
        self.refresh_ttl_days
            .map(|days| unix_timestamp_ms() + days * MS_PER_DAY)
    }
}

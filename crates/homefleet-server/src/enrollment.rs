//! Device enrollment: one-time code consumption and instance bootstrap.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::auth::{CredentialError, CredentialService};
use crate::storage::{unix_timestamp_ms, DatabaseError, EnrollmentCode, FleetDatabase};

/// Enrollment codes are always valid for one hour.
const CODE_VALIDITY_MS: i64 = 60 * 60 * 1000;

/// Successful enrollment: the new instance identity plus its initial
/// credential pair.
#[derive(Debug, Clone)]
pub struct EnrollmentOutcome {
    pub instance_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub access_token_expires_at: i64,
}

/// A freshly minted enrollment code, shown to the operator once.
#[derive(Debug, Clone)]
pub struct CreatedEnrollmentCode {
    pub id: String,
    pub code: String,
    /// Unix milliseconds.
    pub expires_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("Invalid enrollment code")]
    InvalidCode,

    #[error("Enrollment code has expired")]
    Expired,

    #[error("Enrollment code has already been used")]
    Used,

    #[error("Enrollment code has been deactivated")]
    Deactivated,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl EnrollError {
    /// Whether this is a caller-facing validation failure (as opposed to an
    /// internal error whose details must not reach the device).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCode | Self::Expired | Self::Used | Self::Deactivated
        )
    }
}

pub struct EnrollmentService {
    db: FleetDatabase,
    credentials: Arc<CredentialService>,
}

impl EnrollmentService {
    pub fn new(db: FleetDatabase, credentials: Arc<CredentialService>) -> Self {
        Self { db, credentials }
    }

    /// Enroll a new instance with a one-time code.
    ///
    /// The code is consumed atomically before anything else happens, which
    /// closes the race between two concurrent enrollments presenting the same
    /// code. A failure after that point leaves the code burned; the operator
    /// mints a fresh one rather than retrying.
    pub async fn enroll(&self, code: &str) -> Result<EnrollmentOutcome, EnrollError> {
        let code_id = match self.db.consume_enrollment_code(code).await? {
            Some(id) => id,
            None => return Err(self.classify_rejection(code).await?),
        };

        let instance_id = generate_instance_id();
        let name = format!("Home Assistant - {instance_id}");
        let enrolled_at = unix_timestamp_ms();

        self.db
            .create_instance(&instance_id, &name, code, enrolled_at)
            .await?;

        // Linking the code to its instance is bookkeeping; a failure here
        // must not fail the enrollment.
        if let Err(e) = self.db.link_enrollment_code(&code_id, &instance_id).await {
            warn!(code_id, instance_id, error = %e, "Failed to link enrollment code to instance");
        }

        let session = self.credentials.issue_session(&instance_id).await?;

        info!(instance_id, "Instance enrolled");

        Ok(EnrollmentOutcome {
            instance_id,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            access_token_expires_at: session.access_token_expires_at,
        })
    }

    /// Explain why a code failed the active filters: deactivated, used, and
    /// expired are distinct caller-visible reasons; anything else is simply
    /// invalid.
    async fn classify_rejection(&self, code: &str) -> Result<EnrollError, DatabaseError> {
        let Some(record) = self.db.find_enrollment_code(code).await? else {
            return Ok(EnrollError::InvalidCode);
        };

        if record.deactivated_at.is_some() {
            return Ok(EnrollError::Deactivated);
        }
        if record.used_at.is_some() {
            return Ok(EnrollError::Used);
        }
        if record.expires_at <= unix_timestamp_ms() {
            return Ok(EnrollError::Expired);
        }
        // The code became consumable between the two lookups; the caller can
        // just retry.
        Ok(EnrollError::InvalidCode)
    }

    /// Create a new enrollment code with the fixed one-hour validity window.
    pub async fn create_code(&self) -> Result<CreatedEnrollmentCode, DatabaseError> {
        let code = generate_enrollment_code();
        let id = uuid::Uuid::new_v4().to_string();
        let expires_at = unix_timestamp_ms() + CODE_VALIDITY_MS;

        let record = self.db.create_enrollment_code(&id, &code, expires_at).await?;

        info!(code_id = %record.id, "Enrollment code created");

        Ok(CreatedEnrollmentCode {
            id: record.id,
            code: record.code,
            expires_at: record.expires_at,
        })
    }

    /// Deactivate an unused code. Returns `false` if the code was already
    /// used (used and deactivated are mutually exclusive terminal states).
    pub async fn deactivate_code(&self, code_id: &str) -> Result<bool, DatabaseError> {
        self.db.deactivate_enrollment_code(code_id).await
    }

    pub async fn list_active_codes(&self) -> Result<Vec<EnrollmentCode>, DatabaseError> {
        self.db.list_active_enrollment_codes().await
    }

    pub async fn list_all_codes(&self) -> Result<Vec<EnrollmentCode>, DatabaseError> {
        self.db.list_all_enrollment_codes().await
    }
}

/// Instance IDs are `ha-` plus exactly four lowercase hex digits, derived
/// from random bytes.
fn generate_instance_id() -> String {
    format!("ha-{:04x}", rand::rng().random::<u16>())
}

/// Enrollment codes are 8-digit numeric strings.
fn generate_enrollment_code() -> String {
    rand::rng().random_range(10_000_000u32..=99_999_999).to_string()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::TokenSigner;

    async fn setup() -> EnrollmentService {
        let db = FleetDatabase::open_in_memory().await.unwrap();
        let credentials = Arc::new(CredentialService::new(
            db.clone(),
            TokenSigner::new(b"test-secret", 3600),
            None,
        ));
        EnrollmentService::new(db, credentials)
    }

    async fn seed_code(svc: &EnrollmentService, code: &str) -> String {
        let expires_at = unix_timestamp_ms() + CODE_VALIDITY_MS;
        svc.db
            .create_enrollment_code(&uuid::Uuid::new_v4().to_string(), code, expires_at)
            .await
            .unwrap()
            .id
    }

    #[test]
    fn instance_id_matches_fixed_format() {
        for _ in 0..32 {
            let id = generate_instance_id();
            assert_eq!(id.len(), 7);
            assert!(id.starts_with("ha-"));
            assert!(id[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn enrollment_code_is_eight_digits() {
        for _ in 0..32 {
            let code = generate_enrollment_code();
            assert_eq!(code.len(), 8);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn enroll_with_valid_code() {
        let svc = setup().await;
        let code_id = seed_code(&svc, "12345678").await;

        let outcome = svc.enroll("12345678").await.unwrap();
        assert!(outcome.instance_id.starts_with("ha-"));
        assert!(!outcome.access_token.is_empty());
        assert!(!outcome.refresh_token.is_empty());

        // Code is consumed and linked to the instance.
        let record = svc.db.get_enrollment_code(&code_id).await.unwrap();
        assert!(record.used_at.is_some());
        assert_eq!(record.instance_id.as_deref(), Some(outcome.instance_id.as_str()));

        // Instance exists with status offline until its first heartbeat.
        let instance = svc.db.get_instance(&outcome.instance_id).await.unwrap();
        assert_eq!(instance.status, "offline");
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let svc = setup().await;
        assert!(matches!(
            svc.enroll("00000000").await.unwrap_err(),
            EnrollError::InvalidCode
        ));
    }

    #[tokio::test]
    async fn used_code_is_reported_as_used() {
        let svc = setup().await;
        seed_code(&svc, "12345678").await;

        svc.enroll("12345678").await.unwrap();
        assert!(matches!(
            svc.enroll("12345678").await.unwrap_err(),
            EnrollError::Used
        ));
    }

    #[tokio::test]
    async fn deactivated_code_is_rejected() {
        let svc = setup().await;
        let code_id = seed_code(&svc, "12345678").await;

        assert!(svc.deactivate_code(&code_id).await.unwrap());
        assert!(matches!(
            svc.enroll("12345678").await.unwrap_err(),
            EnrollError::Deactivated
        ));
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let svc = setup().await;
        svc.db
            .create_enrollment_code(
                &uuid::Uuid::new_v4().to_string(),
                "12345678",
                unix_timestamp_ms() - 1,
            )
            .await
            .unwrap();

        assert!(matches!(
            svc.enroll("12345678").await.unwrap_err(),
            EnrollError::Expired
        ));
    }

    #[tokio::test]
    async fn used_code_cannot_be_deactivated() {
        let svc = setup().await;
        let code_id = seed_code(&svc, "12345678").await;

        svc.enroll("12345678").await.unwrap();
        assert!(!svc.deactivate_code(&code_id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_enrollments_consume_the_code_exactly_once() {
        let svc = Arc::new(setup().await);
        seed_code(&svc, "12345678").await;

        let a = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.enroll("12345678").await })
        };
        let b = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.enroll("12345678").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        // The loser sees a precise validation failure, not an internal error.
        let failure = results.iter().find(|r| r.is_err()).unwrap();
        assert!(matches!(
            failure.as_ref().unwrap_err(),
            EnrollError::Used | EnrollError::InvalidCode
        ));
    }

    #[tokio::test]
    async fn created_codes_appear_in_active_listing() {
        let svc = setup().await;
        let created = svc.create_code().await.unwrap();

        let active = svc.list_active_codes().await.unwrap();
        assert!(active.iter().any(|c| c.id == created.id));

        svc.deactivate_code(&created.id).await.unwrap();
        let active = svc.list_active_codes().await.unwrap();
        assert!(!active.iter().any(|c| c.id == created.id));
        let all = svc.list_all_codes().await.unwrap();
        assert!(all.iter().any(|c| c.id == created.id));
    }
}

//! Database queries for instances, enrollment codes, and refresh tokens.

use super::db::{unix_timestamp_ms, DatabaseError, FleetDatabase};
use super::models::{EnrollmentCode, Instance, RefreshTokenRecord};

impl FleetDatabase {
    // =========================================================================
    // Instance queries
    // =========================================================================

    /// Create a new instance record (status starts `offline`).
    pub async fn create_instance(
        &self,
        id: &str,
        name: &str,
        enrollment_code: &str,
        enrolled_at: i64,
    ) -> Result<Instance, DatabaseError> {
        sqlx::query(
            "INSERT INTO instances (id, name, enrollment_code, enrolled_at, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 'offline', ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(enrollment_code)
        .bind(enrolled_at)
        .bind(enrolled_at)
        .bind(enrolled_at)
        .execute(self.pool())
        .await?;

        self.get_instance(id).await
    }

    /// Get an instance by ID.
    pub async fn get_instance(&self, id: &str) -> Result<Instance, DatabaseError> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Instance {id}")))
    }

    /// List all instances, most recently created first.
    pub async fn list_instances(&self) -> Result<Vec<Instance>, DatabaseError> {
        let instances =
            sqlx::query_as::<_, Instance>("SELECT * FROM instances ORDER BY created_at DESC")
                .fetch_all(self.pool())
                .await?;
        Ok(instances)
    }

    /// Update an instance's persisted status and last-seen timestamp.
    pub async fn update_instance_status(
        &self,
        id: &str,
        status: &str,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp_ms();
        sqlx::query("UPDATE instances SET status = ?, last_seen = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete an instance and all its dependent records.
    pub async fn delete_instance(&self, id: &str) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        for table in [
            "instance_system_info",
            "instance_updates",
            "instance_stats",
            "connectivity_checks",
            "heartbeats",
            "refresh_tokens",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE instance_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Enrollment code queries
    // =========================================================================

    /// Insert a new enrollment code.
    pub async fn create_enrollment_code(
        &self,
        id: &str,
        code: &str,
        expires_at: i64,
    ) -> Result<EnrollmentCode, DatabaseError> {
        let now = unix_timestamp_ms();
        sqlx::query(
            "INSERT INTO enrollment_codes (id, code, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(code)
        .bind(now)
        .bind(expires_at)
        .execute(self.pool())
        .await?;

        self.get_enrollment_code(id).await
    }

    /// Get an enrollment code by ID.
    pub async fn get_enrollment_code(&self, id: &str) -> Result<EnrollmentCode, DatabaseError> {
        sqlx::query_as::<_, EnrollmentCode>("SELECT * FROM enrollment_codes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Enrollment code {id}")))
    }

    /// Look up an enrollment code by its numeric value, regardless of state.
    pub async fn find_enrollment_code(
        &self,
        code: &str,
    ) -> Result<Option<EnrollmentCode>, DatabaseError> {
        let record =
            sqlx::query_as::<_, EnrollmentCode>("SELECT * FROM enrollment_codes WHERE code = ?")
                .bind(code)
                .fetch_optional(self.pool())
                .await?;
        Ok(record)
    }

    /// Atomically consume an active enrollment code: the used-at stamp is set
    /// in the same statement that checks the active filters, so two concurrent
    /// enrollments with the same code cannot both succeed.
    ///
    /// Returns the consumed code's ID, or `None` if no active code matched.
    pub async fn consume_enrollment_code(
        &self,
        code: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let now = unix_timestamp_ms();
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE enrollment_codes SET used_at = ? \
             WHERE code = ? AND used_at IS NULL AND deactivated_at IS NULL AND expires_at > ? \
             RETURNING id",
        )
        .bind(now)
        .bind(code)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Link a consumed enrollment code to the instance it created.
    pub async fn link_enrollment_code(
        &self,
        code_id: &str,
        instance_id: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE enrollment_codes SET instance_id = ? WHERE id = ?")
            .bind(instance_id)
            .bind(code_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Deactivate an enrollment code. Only unused codes can be deactivated.
    ///
    /// Returns `true` if a code was deactivated.
    pub async fn deactivate_enrollment_code(&self, id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE enrollment_codes SET deactivated_at = ? WHERE id = ? AND used_at IS NULL",
        )
        .bind(unix_timestamp_ms())
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// List codes that are unused, not deactivated, and unexpired.
    pub async fn list_active_enrollment_codes(&self) -> Result<Vec<EnrollmentCode>, DatabaseError> {
        let codes = sqlx::query_as::<_, EnrollmentCode>(
            "SELECT * FROM enrollment_codes \
             WHERE used_at IS NULL AND deactivated_at IS NULL AND expires_at > ? \
             ORDER BY created_at DESC",
        )
        .bind(unix_timestamp_ms())
        .fetch_all(self.pool())
        .await?;
        Ok(codes)
    }

    /// List all codes, including used and expired ones.
    pub async fn list_all_enrollment_codes(&self) -> Result<Vec<EnrollmentCode>, DatabaseError> {
        let codes = sqlx::query_as::<_, EnrollmentCode>(
            "SELECT * FROM enrollment_codes ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(codes)
    }

    // =========================================================================
    // Refresh token queries
    // =========================================================================

    /// Store a refresh token hash. `expires_at` of `None` means the token
    /// never expires by time.
    pub async fn create_refresh_token(
        &self,
        id: &str,
        instance_id: &str,
        token_hash: &str,
        expires_at: Option<i64>,
    ) -> Result<RefreshTokenRecord, DatabaseError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, instance_id, token_hash, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(instance_id)
        .bind(token_hash)
        .bind(unix_timestamp_ms())
        .bind(expires_at)
        .execute(self.pool())
        .await?;

        self.get_refresh_token(id).await
    }

    /// Get a refresh token record by ID.
    pub async fn get_refresh_token(&self, id: &str) -> Result<RefreshTokenRecord, DatabaseError> {
        sqlx::query_as::<_, RefreshTokenRecord>("SELECT * FROM refresh_tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Refresh token {id}")))
    }

    /// Find an active (non-revoked, non-expired) refresh token by hash and
    /// stamp its last-used time.
    pub async fn get_active_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let now = unix_timestamp_ms();
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT * FROM refresh_tokens \
             WHERE token_hash = ? AND revoked_at IS NULL \
             AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        if let Some(record) = &record {
            sqlx::query("UPDATE refresh_tokens SET last_used_at = ? WHERE id = ?")
                .bind(now)
                .bind(&record.id)
                .execute(self.pool())
                .await?;
        }

        Ok(record)
    }

    /// Revoke a refresh token by ID.
    pub async fn revoke_refresh_token(&self, id: &str) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE id = ?")
            .bind(unix_timestamp_ms())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Rotate a refresh token: revoke the old record and insert its successor
    /// in one transaction, so there is no window where both are valid.
    ///
    /// The revoke step only matches a record that is still unrevoked. Two
    /// racing rotations of the same record therefore produce exactly one
    /// successor; the loser rolls back and gets `None`.
    pub async fn rotate_refresh_token(
        &self,
        old_id: &str,
        new_id: &str,
        instance_id: &str,
        new_token_hash: &str,
        new_expires_at: Option<i64>,
    ) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let now = unix_timestamp_ms();
        let mut tx = self.pool().begin().await?;

        let revoked =
            sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
                .bind(now)
                .bind(old_id)
                .execute(&mut *tx)
                .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (id, instance_id, token_hash, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_id)
        .bind(instance_id)
        .bind(new_token_hash)
        .bind(now)
        .bind(new_expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_refresh_token(new_id).await.map(Some)
    }
}

//! Operator-facing management surface.
//!
//! Wraps the storage, enrollment, and dispatch layers behind one handle for
//! whatever fronts the control plane (a dashboard, an internal API). Devices
//! never touch this surface.

use std::sync::Arc;

use tracing::info;

use crate::dispatch::{DispatchError, TriggerOutcome, UpdateDispatcher};
use crate::enrollment::{CreatedEnrollmentCode, EnrollmentService};
use crate::liveness::LivenessTracker;
use crate::storage::{DatabaseError, EnrollmentCode, FleetDatabase, Instance};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub struct FleetAdmin {
    db: FleetDatabase,
    enrollment: EnrollmentService,
    liveness: Arc<LivenessTracker>,
    dispatcher: Arc<UpdateDispatcher>,
}

impl FleetAdmin {
    pub fn new(
        db: FleetDatabase,
        enrollment: EnrollmentService,
        liveness: Arc<LivenessTracker>,
        dispatcher: Arc<UpdateDispatcher>,
    ) -> Self {
        Self {
            db,
            enrollment,
            liveness,
            dispatcher,
        }
    }

    // =========================================================================
    // Instances
    // =========================================================================

    pub async fn list_instances(&self) -> Result<Vec<Instance>, AdminError> {
        Ok(self.db.list_instances().await?)
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<Instance, AdminError> {
        Ok(self.db.get_instance(instance_id).await?)
    }

    /// Whether the instance has contacted the server within the active window.
    pub async fn is_connected(&self, instance_id: &str) -> bool {
        self.liveness.is_connected(instance_id).await
    }

    /// Remove an instance and everything recorded about it. Outstanding
    /// access tokens keep working until they expire; the device simply has no
    /// instance row any more.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), AdminError> {
        // Surface NotFound before touching anything.
        self.db.get_instance(instance_id).await?;
        self.db.delete_instance(instance_id).await?;
        info!(instance_id, "Instance deleted");
        Ok(())
    }

    /// Trigger an update on a connected instance and wait for the device to
    /// report a result (or the wait to time out).
    pub async fn trigger_instance_update(
        &self,
        instance_id: &str,
        update_type: &str,
        addon_slug: &str,
    ) -> Result<TriggerOutcome, AdminError> {
        // Unknown instances fail with NotFound rather than NotConnected.
        self.db.get_instance(instance_id).await?;

        let outcome = self
            .dispatcher
            .request_update(instance_id, update_type, addon_slug)
            .await?;
        Ok(outcome)
    }

    // =========================================================================
    // Enrollment codes
    // =========================================================================

    pub async fn create_enrollment_code(&self) -> Result<CreatedEnrollmentCode, AdminError> {
        Ok(self.enrollment.create_code().await?)
    }

    /// Returns `false` if the code was already used.
    pub async fn deactivate_enrollment_code(&self, code_id: &str) -> Result<bool, AdminError> {
        Ok(self.enrollment.deactivate_code(code_id).await?)
    }

    pub async fn list_active_enrollment_codes(&self) -> Result<Vec<EnrollmentCode>, AdminError> {
        Ok(self.enrollment.list_active_codes().await?)
    }

    pub async fn list_all_enrollment_codes(&self) -> Result<Vec<EnrollmentCode>, AdminError> {
        Ok(self.enrollment.list_all_codes().await?)
    }
}

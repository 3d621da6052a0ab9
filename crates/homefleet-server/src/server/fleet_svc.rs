//! `FleetService` gRPC implementation.
//!
//! The device-facing boundary: enrollment and token refresh are
//! unauthenticated but rate-limited; every other method authenticates a
//! bearer access token, touches the liveness tracker, and persists telemetry
//! best-effort — a failed telemetry write is logged and swallowed so the
//! device never sees it as an auth or transport failure.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

use homefleet_proto::v1::fleet_service_server::FleetService;
use homefleet_proto::v1::{
    ConnectivityReportRequest, ConnectivityReportResponse, EnrollRequest, EnrollResponse,
    HeartbeatRequest, HeartbeatResponse, PendingUpdate, RefreshTokenRequest, RefreshTokenResponse,
    StatsReportRequest, StatsReportResponse, TriggerUpdateRequest, TriggerUpdateResponse,
    UpdateReportRequest, UpdateReportResponse,
};

use crate::auth::CredentialService;
use crate::dispatch::{TriggerOutcome, UpdateDispatcher};
use crate::enrollment::EnrollmentService;
use crate::liveness::LivenessTracker;
use crate::ratelimit::{FixedWindowLimiter, ENROLL_POLICY, REFRESH_POLICY};
use crate::storage::{
    unix_timestamp_ms, ConnectivityCheckParams, FleetDatabase, StatsParams, SystemInfoParams,
    UpdateComponentParams,
};

use super::bearer::{authenticate, peer_key, AuthContext};

pub struct FleetServiceImpl {
    db: FleetDatabase,
    credentials: Arc<CredentialService>,
    enrollment: EnrollmentService,
    liveness: Arc<LivenessTracker>,
    dispatcher: Arc<UpdateDispatcher>,
    limiter: Arc<FixedWindowLimiter>,
}

impl FleetServiceImpl {
    pub fn new(
        db: FleetDatabase,
        credentials: Arc<CredentialService>,
        enrollment: EnrollmentService,
        liveness: Arc<LivenessTracker>,
        dispatcher: Arc<UpdateDispatcher>,
        limiter: Arc<FixedWindowLimiter>,
    ) -> Self {
        Self {
            db,
            credentials,
            enrollment,
            liveness,
            dispatcher,
            limiter,
        }
    }

    /// Authenticate the call and record the contact in the liveness tracker.
    #[allow(clippy::result_large_err)]
    async fn authenticated_touch<T>(&self, request: &Request<T>) -> Result<AuthContext, Status> {
        let ctx = authenticate(&self.credentials, request)?;
        self.liveness.touch(&ctx.instance_id).await;
        Ok(ctx)
    }
}

#[tonic::async_trait]
impl FleetService for FleetServiceImpl {
    #[instrument(skip(self, request), fields(rpc = "Enroll"))]
    async fn enroll(
        &self,
        request: Request<EnrollRequest>,
    ) -> Result<Response<EnrollResponse>, Status> {
        if !self
            .limiter
            .consume(&peer_key("enroll", &request), ENROLL_POLICY)
            .await
        {
            return Err(Status::resource_exhausted("Rate limit exceeded"));
        }

        let code = request.into_inner().code;
        // Only the trailing two digits are ever logged.
        let masked = code.get(code.len().saturating_sub(2)..).unwrap_or("");
        info!(code_masked = masked, "Enroll request received");

        match self.enrollment.enroll(&code).await {
            Ok(outcome) => {
                info!(instance_id = %outcome.instance_id, "Enrollment successful");
                Ok(Response::new(EnrollResponse {
                    success: true,
                    error: String::new(),
                    instance_id: outcome.instance_id,
                    access_token: outcome.access_token,
                    refresh_token: outcome.refresh_token,
                    access_token_expires_at: outcome.access_token_expires_at,
                }))
            }
            Err(e) => {
                let reason = if e.is_validation() {
                    e.to_string()
                } else {
                    warn!(error = %e, "Enrollment failed internally");
                    "Enrollment failed".to_string()
                };
                info!(reason = %reason, "Enrollment rejected");
                Ok(Response::new(EnrollResponse {
                    success: false,
                    error: reason,
                    ..Default::default()
                }))
            }
        }
    }

    #[instrument(skip(self, request), fields(rpc = "RefreshToken"))]
    async fn refresh_token(
        &self,
        request: Request<RefreshTokenRequest>,
    ) -> Result<Response<RefreshTokenResponse>, Status> {
        if !self
            .limiter
            .consume(&peer_key("refresh", &request), REFRESH_POLICY)
            .await
        {
            return Err(Status::resource_exhausted("Rate limit exceeded"));
        }

        let refresh_token = request.into_inner().refresh_token;
        if refresh_token.is_empty() {
            return Ok(Response::new(RefreshTokenResponse {
                success: false,
                error: "Missing refresh token".to_string(),
                ..Default::default()
            }));
        }

        let record = self
            .credentials
            .validate_refresh_token(&refresh_token)
            .await
            .map_err(|e| {
                warn!(error = %e, "Refresh token lookup failed");
                Status::internal("Token refresh failed")
            })?;

        let Some(record) = record else {
            return Ok(Response::new(RefreshTokenResponse {
                success: false,
                error: "Invalid refresh token".to_string(),
                ..Default::default()
            }));
        };

        let session = self.credentials.rotate_session(&record).await.map_err(|e| {
            warn!(instance_id = %record.instance_id, error = %e, "Token rotation failed");
            Status::internal("Token refresh failed")
        })?;

        // A concurrent refresh with the same secret already rotated this
        // record; only the winner's chain is valid.
        let Some(session) = session else {
            return Ok(Response::new(RefreshTokenResponse {
                success: false,
                error: "Invalid refresh token".to_string(),
                ..Default::default()
            }));
        };

        info!(instance_id = %record.instance_id, "Refresh token rotated");

        Ok(Response::new(RefreshTokenResponse {
            success: true,
            error: String::new(),
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            access_token_expires_at: session.access_token_expires_at,
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "Heartbeat"))]
    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<HeartbeatResponse>, Status> {
        let server_receive = unix_timestamp_ms();
        let ctx = self.authenticated_touch(&request).await?;
        let req = request.into_inner();

        // One-way latency approximation from the client's send time.
        let latency_ms = (req.client_timestamp > 0)
            .then(|| (server_receive - req.client_timestamp).max(0));

        if let Err(e) = self.db.insert_heartbeat(&ctx.instance_id, latency_ms).await {
            warn!(instance_id = %ctx.instance_id, error = %e, "Failed to record heartbeat");
        }
        if let Err(e) = self.db.update_instance_status(&ctx.instance_id, "online").await {
            warn!(instance_id = %ctx.instance_id, error = %e, "Failed to update instance status");
        }

        if let Some(info) = req.system_info {
            let params = SystemInfoParams {
                supervisor: info.supervisor,
                homeassistant: info.homeassistant,
                hassos: info.hassos,
                docker: info.docker,
                hostname: info.hostname,
                operating_system: info.operating_system,
                machine: info.machine,
                arch: info.arch,
                channel: info.channel,
                state: info.state,
            };
            if let Err(e) = self.db.upsert_system_info(&ctx.instance_id, &params).await {
                warn!(instance_id = %ctx.instance_id, error = %e, "Failed to upsert system info");
            }
        }

        let pending_update = self
            .dispatcher
            .pending_for(&ctx.instance_id)
            .await
            .map(|descriptor| {
                info!(
                    instance_id = %ctx.instance_id,
                    update_type = %descriptor.update_type,
                    "Heartbeat carries pending update"
                );
                PendingUpdate {
                    has_update: true,
                    update_type: descriptor.update_type,
                    addon_slug: descriptor.addon_slug,
                }
            });

        Ok(Response::new(HeartbeatResponse {
            alive: true,
            time: unix_timestamp_ms(),
            latency_ms: latency_ms.unwrap_or(0),
            pending_update,
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "ReportUpdates"))]
    async fn report_updates(
        &self,
        request: Request<UpdateReportRequest>,
    ) -> Result<Response<UpdateReportResponse>, Status> {
        let ctx = self.authenticated_touch(&request).await?;
        let req = request.into_inner();

        let components: Vec<UpdateComponentParams> = req
            .components
            .into_iter()
            .map(|c| UpdateComponentParams {
                component_type: c.component_type,
                slug: c.slug,
                name: c.name,
                version: c.version,
                version_latest: c.version_latest,
                update_available: c.update_available,
            })
            .collect();

        let count = components.len();
        if let Err(e) = self
            .db
            .replace_reported_updates(&ctx.instance_id, req.generated_at, &components)
            .await
        {
            warn!(instance_id = %ctx.instance_id, error = %e, "Failed to store update report");
        } else {
            info!(instance_id = %ctx.instance_id, component_count = count, "Update report stored");
        }

        Ok(Response::new(UpdateReportResponse {
            accepted: true,
            message: "Update report accepted".to_string(),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "ReportStats"))]
    async fn report_stats(
        &self,
        request: Request<StatsReportRequest>,
    ) -> Result<Response<StatsReportResponse>, Status> {
        let ctx = self.authenticated_touch(&request).await?;
        let req = request.into_inner();

        let Some(stats) = req.stats else {
            return Ok(Response::new(StatsReportResponse {
                accepted: false,
                message: "Missing stats".to_string(),
            }));
        };

        let params = StatsParams {
            cpu_percent: stats.cpu_percent,
            memory_usage: stats.memory_usage,
            memory_limit: stats.memory_limit,
            memory_percent: stats.memory_percent,
            network_tx: stats.network_tx,
            network_rx: stats.network_rx,
            blk_read: stats.blk_read,
            blk_write: stats.blk_write,
        };
        if let Err(e) = self
            .db
            .insert_stats_report(&ctx.instance_id, req.generated_at, &params)
            .await
        {
            warn!(instance_id = %ctx.instance_id, error = %e, "Failed to store stats report");
        }

        Ok(Response::new(StatsReportResponse {
            accepted: true,
            message: "Stats report accepted".to_string(),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "ReportConnectivity"))]
    async fn report_connectivity(
        &self,
        request: Request<ConnectivityReportRequest>,
    ) -> Result<Response<ConnectivityReportResponse>, Status> {
        let ctx = self.authenticated_touch(&request).await?;
        let req = request.into_inner();

        let public_ip = (!req.public_ip.is_empty()).then_some(req.public_ip);
        let checks: Vec<ConnectivityCheckParams> = req
            .checks
            .into_iter()
            .map(|c| ConnectivityCheckParams {
                target: c.target,
                status: c.status,
                latency_ms: (c.latency_ms > 0).then_some(c.latency_ms),
                error: (!c.error.is_empty()).then_some(c.error),
            })
            .collect();

        if let Err(e) = self
            .db
            .insert_connectivity_checks(&ctx.instance_id, public_ip.as_deref(), &checks)
            .await
        {
            warn!(instance_id = %ctx.instance_id, error = %e, "Failed to store connectivity checks");
        }

        Ok(Response::new(ConnectivityReportResponse {
            accepted: true,
            message: "Connectivity report accepted".to_string(),
        }))
    }

    #[instrument(skip(self, request), fields(rpc = "TriggerUpdate"))]
    async fn trigger_update(
        &self,
        request: Request<TriggerUpdateRequest>,
    ) -> Result<Response<TriggerUpdateResponse>, Status> {
        let ctx = self.authenticated_touch(&request).await?;
        let req = request.into_inner();

        info!(
            instance_id = %ctx.instance_id,
            update_type = %req.update_type,
            addon_slug = %req.addon_slug,
            success = req.success,
            "Update trigger result received"
        );

        self.dispatcher
            .complete(
                &ctx.instance_id,
                TriggerOutcome {
                    success: req.success,
                    error: (!req.error.is_empty()).then_some(req.error),
                    message: (!req.message.is_empty()).then_some(req.message),
                },
            )
            .await;

        Ok(Response::new(TriggerUpdateResponse {
            accepted: true,
            message: "Update result received".to_string(),
        }))
    }
}

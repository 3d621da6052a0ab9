//! Database queries for device telemetry: heartbeats, system info, update
//! snapshots, stats samples, and connectivity checks.
//!
//! Callers on the RPC path treat failures here as best-effort (logged and
//! swallowed), so these queries never need to be retried.

use super::db::{unix_timestamp_ms, DatabaseError, FleetDatabase};
use super::models::{
    ConnectivityCheckRecord, HeartbeatRecord, InstanceStatsRecord, InstanceUpdateRecord,
    SystemInfoRecord,
};

/// System-info snapshot from the Supervisor `/info` API.
#[derive(Debug, Clone, Default)]
pub struct SystemInfoParams {
    pub supervisor: String,
    pub homeassistant: String,
    pub hassos: String,
    pub docker: String,
    pub hostname: String,
    pub operating_system: String,
    pub machine: String,
    pub arch: String,
    pub channel: String,
    pub state: String,
}

/// One component in an update report.
#[derive(Debug, Clone)]
pub struct UpdateComponentParams {
    pub component_type: String,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub version_latest: String,
    pub update_available: bool,
}

/// One core-stats sample.
#[derive(Debug, Clone, Default)]
pub struct StatsParams {
    pub cpu_percent: f64,
    pub memory_usage: i64,
    pub memory_limit: i64,
    pub memory_percent: f64,
    pub network_tx: i64,
    pub network_rx: i64,
    pub blk_read: i64,
    pub blk_write: i64,
}

/// One connectivity probe result.
#[derive(Debug, Clone)]
pub struct ConnectivityCheckParams {
    pub target: String,
    pub status: String,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
}

impl FleetDatabase {
    /// Append a heartbeat row.
    pub async fn insert_heartbeat(
        &self,
        instance_id: &str,
        latency_ms: Option<i64>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO heartbeats (id, instance_id, timestamp, status, latency_ms) \
             VALUES (?, ?, ?, 'online', ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(instance_id)
        .bind(unix_timestamp_ms())
        .bind(latency_ms)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Heartbeats for an instance newer than `cutoff` (Unix ms), newest first.
    pub async fn list_heartbeats_since(
        &self,
        instance_id: &str,
        cutoff: i64,
    ) -> Result<Vec<HeartbeatRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, HeartbeatRecord>(
            "SELECT * FROM heartbeats WHERE instance_id = ? AND timestamp >= ? \
             ORDER BY timestamp DESC",
        )
        .bind(instance_id)
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Insert or update the single system-info row for an instance.
    pub async fn upsert_system_info(
        &self,
        instance_id: &str,
        info: &SystemInfoParams,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO instance_system_info \
             (id, instance_id, supervisor, homeassistant, hassos, docker, hostname, \
              operating_system, machine, arch, channel, state, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (instance_id) DO UPDATE SET \
              supervisor = excluded.supervisor, homeassistant = excluded.homeassistant, \
              hassos = excluded.hassos, docker = excluded.docker, hostname = excluded.hostname, \
              operating_system = excluded.operating_system, machine = excluded.machine, \
              arch = excluded.arch, channel = excluded.channel, state = excluded.state, \
              updated_at = excluded.updated_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(instance_id)
        .bind(&info.supervisor)
        .bind(&info.homeassistant)
        .bind(&info.hassos)
        .bind(&info.docker)
        .bind(&info.hostname)
        .bind(&info.operating_system)
        .bind(&info.machine)
        .bind(&info.arch)
        .bind(&info.channel)
        .bind(&info.state)
        .bind(unix_timestamp_ms())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get the system-info row for an instance, if any.
    pub async fn get_system_info(
        &self,
        instance_id: &str,
    ) -> Result<Option<SystemInfoRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, SystemInfoRecord>(
            "SELECT * FROM instance_system_info WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Replace the instance's update snapshot with a freshly reported one.
    pub async fn replace_reported_updates(
        &self,
        instance_id: &str,
        generated_at: i64,
        components: &[UpdateComponentParams],
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp_ms();
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM instance_updates WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        for component in components {
            sqlx::query(
                "INSERT INTO instance_updates \
                 (id, instance_id, update_type, slug, name, version, version_latest, \
                  update_available, report_generated_at, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(instance_id)
            .bind(&component.component_type)
            .bind(&component.slug)
            .bind(&component.name)
            .bind(&component.version)
            .bind(&component.version_latest)
            .bind(i64::from(component.update_available))
            .bind(generated_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List reported updates for an instance, newest first.
    pub async fn list_reported_updates(
        &self,
        instance_id: &str,
    ) -> Result<Vec<InstanceUpdateRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, InstanceUpdateRecord>(
            "SELECT * FROM instance_updates WHERE instance_id = ? ORDER BY created_at DESC",
        )
        .bind(instance_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Append a core-stats sample.
    pub async fn insert_stats_report(
        &self,
        instance_id: &str,
        generated_at: i64,
        stats: &StatsParams,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO instance_stats \
             (id, instance_id, generated_at, cpu_percent, memory_usage, memory_limit, \
              memory_percent, network_tx, network_rx, blk_read, blk_write, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(instance_id)
        .bind(generated_at)
        .bind(stats.cpu_percent)
        .bind(stats.memory_usage)
        .bind(stats.memory_limit)
        .bind(stats.memory_percent)
        .bind(stats.network_tx)
        .bind(stats.network_rx)
        .bind(stats.blk_read)
        .bind(stats.blk_write)
        .bind(unix_timestamp_ms())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// List stats samples for an instance, newest first.
    pub async fn list_stats_reports(
        &self,
        instance_id: &str,
    ) -> Result<Vec<InstanceStatsRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, InstanceStatsRecord>(
            "SELECT * FROM instance_stats WHERE instance_id = ? ORDER BY created_at DESC",
        )
        .bind(instance_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Append one row per connectivity probe in a report. All rows share the
    /// report's public IP.
    pub async fn insert_connectivity_checks(
        &self,
        instance_id: &str,
        public_ip: Option<&str>,
        checks: &[ConnectivityCheckParams],
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp_ms();
        let mut tx = self.pool().begin().await?;

        for check in checks {
            sqlx::query(
                "INSERT INTO connectivity_checks \
                 (id, instance_id, timestamp, target, status, latency_ms, error, public_ip) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(instance_id)
            .bind(now)
            .bind(&check.target)
            .bind(&check.status)
            .bind(check.latency_ms)
            .bind(&check.error)
            .bind(public_ip)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List connectivity checks for an instance, newest first.
    pub async fn list_connectivity_checks(
        &self,
        instance_id: &str,
    ) -> Result<Vec<ConnectivityCheckRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, ConnectivityCheckRecord>(
            "SELECT * FROM connectivity_checks WHERE instance_id = ? ORDER BY timestamp DESC",
        )
        .bind(instance_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}

//! Data models for Homefleet control-plane storage.
//!
//! All timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub enrollment_code: Option<String>,
    pub enrolled_at: Option<i64>,
    pub status: String,
    pub last_seen: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrollmentCode {
    pub id: String,
    pub code: String,
    pub instance_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub used_at: Option<i64>,
    pub deactivated_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub instance_id: String,
    pub token_hash: String,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HeartbeatRecord {
    pub id: String,
    pub instance_id: String,
    pub timestamp: i64,
    pub status: String,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemInfoRecord {
    pub id: String,
    pub instance_id: String,
    pub supervisor: Option<String>,
    pub homeassistant: Option<String>,
    pub hassos: Option<String>,
    pub docker: Option<String>,
    pub hostname: Option<String>,
    pub operating_system: Option<String>,
    pub machine: Option<String>,
    pub arch: Option<String>,
    pub channel: Option<String>,
    pub state: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstanceUpdateRecord {
    pub id: String,
    pub instance_id: String,
    pub update_type: String,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub version_latest: Option<String>,
    pub update_available: Option<i64>,
    pub report_generated_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InstanceStatsRecord {
    pub id: String,
    pub instance_id: String,
    pub generated_at: Option<i64>,
    pub cpu_percent: Option<f64>,
    pub memory_usage: Option<i64>,
    pub memory_limit: Option<i64>,
    pub memory_percent: Option<f64>,
    pub network_tx: Option<i64>,
    pub network_rx: Option<i64>,
    pub blk_read: Option<i64>,
    pub blk_write: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConnectivityCheckRecord {
    pub id: String,
    pub instance_id: String,
    pub timestamp: i64,
    pub target: String,
    pub status: String,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
    pub public_ip: Option<String>,
}

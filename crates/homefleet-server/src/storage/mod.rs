//! SQLite storage for the Homefleet control plane.
//!
//! Provides persistence for instances, enrollment codes, refresh tokens, and
//! device telemetry. The persistent store is the source of truth for these
//! records; the in-memory liveness/dispatch maps are coordination structures
//! that do not survive a restart.

mod db;
mod models;
mod queries;
mod queries_telemetry;

#[cfg(test)]
mod tests;

pub use db::{unix_timestamp, unix_timestamp_ms, DatabaseError, FleetDatabase};
pub use models::*;
pub use queries_telemetry::{
    ConnectivityCheckParams, StatsParams, SystemInfoParams, UpdateComponentParams,
};

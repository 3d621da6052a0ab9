//! Homefleet Control Plane Library
//!
//! Core functionality for the Homefleet server:
//! - SQLite storage for instances, enrollment codes, tokens, and telemetry
//! - JWT access tokens with rotated opaque refresh tokens
//! - One-time enrollment codes for device bootstrap
//! - Heartbeat-driven liveness tracking
//! - Update-trigger dispatch correlated across heartbeats
//! - The device-facing gRPC service and the operator surface

pub mod admin;
pub mod auth;
pub mod dispatch;
pub mod enrollment;
pub mod liveness;
pub mod ratelimit;
pub mod server;
pub mod storage;
pub mod tls;

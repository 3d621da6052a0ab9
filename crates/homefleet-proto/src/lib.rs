//! Homefleet Protocol Buffers
//!
//! Generated protobuf code for the Homefleet gRPC API.
//!
//! This crate contains the `FleetService` device-facing API: enrollment,
//! token refresh, heartbeat, telemetry reports, and update-trigger results.

#![allow(clippy::derive_partial_eq_without_eq)]

/// Homefleet v1 API definitions.
///
/// All generated types and services are included here.
pub mod v1 {
    tonic::include_proto!("homefleet.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;

// Re-export prost_types for downstream crates that need Struct/Value conversion
pub use prost_types;

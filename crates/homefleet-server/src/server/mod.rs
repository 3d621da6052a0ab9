//! gRPC surface of the control plane.

mod bearer;
mod fleet_svc;


pub use bearer::{authenticate, peer_key, AuthContext};
pub use fleet_svc::FleetServiceImpl;

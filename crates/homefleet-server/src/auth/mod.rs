//! Authentication module for the Homefleet control plane.
//!
//! Provides access-token signing/verification, the access-token revocation
//! set, and refresh-token lifecycle management.

pub mod claims;
pub mod credentials;
pub mod jwt;
pub mod revocation;

pub use claims::Claims;
pub use credentials::{CredentialError, CredentialService, SessionTokens};
pub use jwt::TokenSigner;

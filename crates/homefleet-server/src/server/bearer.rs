//! Bearer-token authentication for gRPC requests.
//!
//! Every method except Enroll and RefreshToken carries an access token in
//! the `authorization` metadata header. Verification failures terminate the
//! call with `Unauthenticated`.

use tonic::{Request, Status};

use crate::auth::CredentialService;

/// The verified identity attached to an authenticated call.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub instance_id: String,
    pub token_id: String,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

/// Extract and verify the bearer token from a request's metadata.
#[allow(clippy::result_large_err)]
pub fn authenticate<T>(
    credentials: &CredentialService,
    req: &Request<T>,
) -> Result<AuthContext, Status> {
    let token = bearer_token(req)
        .ok_or_else(|| Status::unauthenticated("Missing access token"))?;

    let claims = credentials
        .verify_access_token(token)
        .ok_or_else(|| Status::unauthenticated("Invalid access token"))?;

    Ok(AuthContext {
        instance_id: claims.sub,
        token_id: claims.jti,
        issued_at: claims.iat,
        expires_at: claims.exp,
    })
}

fn bearer_token<T>(req: &Request<T>) -> Option<&str> {
    req.metadata()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Rate-limit key for an unauthenticated entry point: operation plus the
/// caller's peer address.
pub fn peer_key<T>(operation: &str, req: &Request<T>) -> String {
    match req.remote_addr() {
        Some(addr) => format!("{operation}:{}", addr.ip()),
        None => format!("{operation}:unknown"),
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::TokenSigner;
    use crate::storage::FleetDatabase;
    use tonic::metadata::MetadataValue;

    async fn test_credentials() -> CredentialService {
        let db = FleetDatabase::open_in_memory().await.unwrap();
        CredentialService::new(db, TokenSigner::new(b"test-secret", 3600), None)
    }

    fn request_with_token(token: &str) -> Request<()> {
        let mut req = Request::new(());
        req.metadata_mut().insert(
            "authorization",
            MetadataValue::try_from(format!("Bearer {token}")).unwrap(),
        );
        req
    }

    #[tokio::test]
    async fn valid_access_token_passes() {
        let credentials = test_credentials().await;
        let db = FleetDatabase::open_in_memory().await.unwrap();
        db.create_instance("ha-1a2b", "Home Assistant - ha-1a2b", "12345678", 0)
            .await
            .unwrap();
        let session = {
            let credentials = CredentialService::new(
                db,
                TokenSigner::new(b"test-secret", 3600),
                None,
            );
            credentials.issue_session("ha-1a2b").await.unwrap()
        };

        let ctx = authenticate(&credentials, &request_with_token(&session.access_token)).unwrap();
        assert_eq!(ctx.instance_id, "ha-1a2b");
        assert!(ctx.expires_at > ctx.issued_at);
    }

    #[tokio::test]
    async fn missing_header_fails() {
        let credentials = test_credentials().await;
        let err = authenticate(&credentials, &Request::new(())).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn malformed_header_fails() {
        let credentials = test_credentials().await;
        let mut req = Request::new(());
        req.metadata_mut()
            .insert("authorization", MetadataValue::from_static("Basic abc"));

        let err = authenticate(&credentials, &req).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[tokio::test]
    async fn invalid_token_fails() {
        let credentials = test_credentials().await;
        let err =
            authenticate(&credentials, &request_with_token("not-a-token")).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn peer_key_without_remote_addr_is_stable() {
        let req = Request::new(());
        assert_eq!(peer_key("enroll", &req), "enroll:unknown");
    }
}

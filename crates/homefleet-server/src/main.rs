//! Homefleet Control Plane Server
//!
//! gRPC control plane for remotely managed Home Assistant instances.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homefleet_proto::v1::fleet_service_server::FleetServiceServer;

use homefleet_server::auth::{CredentialService, TokenSigner};
use homefleet_server::dispatch::UpdateDispatcher;
use homefleet_server::enrollment::EnrollmentService;
use homefleet_server::liveness::LivenessTracker;
use homefleet_server::ratelimit::FixedWindowLimiter;
use homefleet_server::server::FleetServiceImpl;
use homefleet_server::storage::FleetDatabase;
use homefleet_server::tls::TlsMode;

#[derive(Parser, Debug)]
#[command(name = "homefleet-server")]
#[command(
    version,
    about = "Homefleet control plane - device enrollment, token auth, and update dispatch"
)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:50051")]
    addr: SocketAddr,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Secret used to sign access tokens. Must be at least 32 bytes.
    #[arg(long, env = "HOMEFLEET_AUTH_SECRET")]
    auth_secret: String,

    /// Access token TTL in seconds.
    #[arg(long, default_value_t = 3600)]
    access_ttl: i64,

    /// Refresh token TTL in days. Omit for tokens that never expire by time.
    #[arg(long)]
    refresh_ttl_days: Option<i64>,

    /// How long an update trigger waits for the device's result, in seconds.
    #[arg(long, default_value_t = 60)]
    trigger_timeout: u64,

    /// Path to TLS certificate file (PEM).
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM).
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "homefleet_server=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if args.auth_secret.len() < 32 {
        anyhow::bail!("auth secret must be at least 32 bytes");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        "Starting homefleet-server"
    );

    let db = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening fleet database");
            FleetDatabase::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening fleet database (default path)");
            FleetDatabase::open(&default_path).await?
        }
    };

    let credentials = Arc::new(CredentialService::new(
        db.clone(),
        TokenSigner::new(args.auth_secret.as_bytes(), args.access_ttl),
        args.refresh_ttl_days,
    ));

    let liveness = Arc::new(LivenessTracker::default());
    let dispatcher = Arc::new(UpdateDispatcher::new(
        Arc::clone(&liveness),
        Duration::from_secs(args.trigger_timeout),
    ));
    let limiter = Arc::new(FixedWindowLimiter::new());
    let enrollment = EnrollmentService::new(db.clone(), Arc::clone(&credentials));

    let fleet = FleetServiceImpl::new(
        db,
        credentials,
        enrollment,
        liveness,
        dispatcher,
        limiter,
    );

    let tls_mode = if let (Some(cert), Some(key)) = (&args.tls_cert, &args.tls_key) {
        TlsMode::Custom {
            cert_path: cert.clone(),
            key_path: key.clone(),
        }
    } else {
        TlsMode::Disabled
    };
    let tls_config = tls_mode.to_server_tls_config()?;

    let mut builder = Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(10)));
    if let Some(tls) = tls_config {
        builder = builder.tls_config(tls)?;
        info!(addr = %args.addr, "Fleet server starting with TLS");
    } else {
        info!(addr = %args.addr, "Fleet server starting (plaintext)");
    }

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<FleetServiceServer<FleetServiceImpl>>()
        .await;

    let grpc_router = builder
        .add_service(health_service)
        .add_service(FleetServiceServer::new(fleet));

    tokio::select! {
        result = grpc_router.serve(args.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Fleet server stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".homefleet").join("fleet.db"))
}

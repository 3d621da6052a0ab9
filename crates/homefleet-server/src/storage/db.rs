//! SQLite pool management for the control plane.
//!
//! One pool per process. WAL journaling and foreign keys are always on, and
//! the embedded migrations run as part of opening, so a `FleetDatabase` in
//! hand is always fully migrated.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

#[derive(Clone)]
pub struct FleetDatabase {
    pool: Pool<Sqlite>,
}

impl FleetDatabase {
    /// Open the database at `path`, creating the file and any missing parent
    /// directories.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let db = Self::connect(options, 5).await?;
        info!(path = %path.display(), "Fleet database ready");
        Ok(db)
    }

    /// In-memory database for tests. Limited to a single connection: each
    /// fresh in-memory connection would otherwise see an empty database.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        Self::connect(options, 1).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
    ) -> Result<Self, DatabaseError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Current time in Unix milliseconds, the unit of every persisted timestamp.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp_ms() -> i64 {
    since_epoch().as_millis() as i64
}

/// Current time in Unix seconds, the unit of JWT `iat`/`exp`.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    since_epoch().as_secs() as i64
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        DatabaseError::Query(e.to_string())
    }
}

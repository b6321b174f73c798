//! Storage layer for the meshbridge relayer.
//!
//! This module provides database operations for:
//! - The event queue (idempotent ingest, FIFO dispatch, processed flag)
//! - Identity bindings (custodial wallets per source address)
//! - Sync state (pull-channel cursor)

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub mod bindings;
pub mod queue;
pub mod sync;
pub mod types;

pub use types::*;

/// Database storage for the relayer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Call
    /// [`Storage::run_migrations`] before use.
    ///
    /// # Example
    /// ```no_run
    /// # use meshbridge_relayer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://meshbridge.db", 5, 1).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url, 5, 1).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let event_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_queue")
            .fetch_one(&self.pool)
            .await?;

        let unprocessed_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_queue WHERE processed = 0")
                .fetch_one(&self.pool)
                .await?;

        let binding_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identity_bindings")
            .fetch_one(&self.pool)
            .await?;

        let sync_state = self.get_sync_state().await?;

        Ok(DatabaseStats {
            event_count: event_count as u64,
            unprocessed_count: unprocessed_count as u64,
            processed_count: (event_count - unprocessed_count) as u64,
            binding_count: binding_count as u64,
            last_block_number: sync_state.last_block_number,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Current time in unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decode a JSON column, falling back to the default on malformed content.
pub(crate) fn decode_json_column<T: DeserializeOwned + Default>(
    raw: Option<&str>,
    column: &'static str,
    key: &str,
) -> T {
    let Some(raw) = raw else {
        return T::default();
    };
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(column, key, error = %e, "Malformed JSON column, using empty default");
            T::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    pub(crate) async fn setup_storage() -> (Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_db)
    }

    #[tokio::test]
    async fn test_storage_creation() {
        let (storage, _temp_db) = setup_storage().await;

        storage.health_check().await.unwrap();

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats() {
        let (storage, _temp_db) = setup_storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.event_count, 0);
        assert_eq!(stats.unprocessed_count, 0);
        assert_eq!(stats.processed_count, 0);
        assert_eq!(stats.binding_count, 0);
        assert_eq!(stats.last_block_number, 0);

        storage.close().await;
    }

    #[test]
    fn test_decode_json_column_fallback() {
        let rounds: Vec<u64> = decode_json_column(Some("[1,2]"), "rounds", "k");
        assert_eq!(rounds, vec![1, 2]);

        let broken: Vec<u64> = decode_json_column(Some("{not json"), "rounds", "k");
        assert!(broken.is_empty());

        let missing: Vec<String> = decode_json_column(None, "args", "k");
        assert!(missing.is_empty());
    }
}

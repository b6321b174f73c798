//! Sync state storage operations.

use anyhow::{Context, Result};
use sqlx::Row;

use super::{Storage, SyncState};

impl Storage {
    /// Get the current sync state.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            r#"
            SELECT last_block_number, chain_id, initialized, updated_at
            FROM sync_state
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch sync state")?;

        Ok(SyncState {
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            chain_id: row.get::<i64, _>("chain_id") as u64,
            initialized: row.get::<i64, _>("initialized") != 0,
            updated_at: row.get("updated_at"),
        })
    }

    /// Initialize the cursor for a chain.
    pub async fn initialize_sync_state(&self, chain_id: u64, last_block: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                chain_id = ?,
                initialized = 1,
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(last_block as i64)
        .bind(chain_id as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to initialize sync state")?;

        Ok(())
    }

    /// Move the cursor forward without ingesting the skipped blocks.
    ///
    /// Never moves it backward. Returns the resulting cursor.
    pub async fn force_advance(&self, to_block: u64) -> Result<u64> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = MAX(last_block_number, ?),
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(to_block as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to advance sync state")?;

        Ok(self.get_sync_state().await?.last_block_number)
    }
}

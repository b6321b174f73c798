//! Event queue storage operations.

use anyhow::{Context, Result};
use meshbridge_core::{EventId, UserContext};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{decode_json_column, now_millis, EventRecord, QueuedEvent, Storage};
use crate::custody::IdentityBinder;

impl Storage {
    /// Durably enqueue one event.
    ///
    /// Returns `true` when the row is new, `false` when the event id was already queued.
    /// A fresh user event provisions the user's binding (or refreshes its cached
    /// presale state) inside the same transaction.
    pub async fn enqueue(&self, record: &EventRecord, binder: &IdentityBinder) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let inserted = insert_event(&mut tx, record, binder).await?;

        tx.commit().await.context("Failed to commit enqueue")?;
        Ok(inserted)
    }

    /// Enqueue a batch and advance the pull cursor to `advance_to` atomically.
    ///
    /// Returns the number of new rows.
    pub async fn enqueue_batch(
        &self,
        records: &[EventRecord],
        binder: &IdentityBinder,
        advance_to: u64,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let mut inserted = 0;
        for record in records {
            if insert_event(&mut tx, record, binder).await? {
                inserted += 1;
            }
        }

        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = MAX(last_block_number, ?),
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(advance_to as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .context("Failed to advance cursor")?;

        tx.commit().await.context("Failed to commit batch")?;

        debug!(
            batch = records.len(),
            inserted,
            cursor = advance_to,
            "Batch committed"
        );
        Ok(inserted)
    }

    /// Unprocessed entries, oldest first.
    pub async fn unprocessed(&self, limit: u32) -> Result<Vec<QueuedEvent>> {
        self.unprocessed_after(None, limit).await
    }

    /// Unprocessed entries queued after the `(created_at, seq)` position `after`, oldest
    /// first. Lets a caller page past entries it chose to leave in the queue.
    pub async fn unprocessed_after(
        &self,
        after: Option<(i64, i64)>,
        limit: u32,
    ) -> Result<Vec<QueuedEvent>> {
        let (created_at, seq) = after.unwrap_or((i64::MIN, i64::MIN));

        let rows = sqlx::query(
            r#"
            SELECT seq, event_id, transaction_hash, block_number, log_index, event_type,
                   args, user_context, user_address, processed, created_at,
                   processed_at, destination_tx_id
            FROM event_queue
            WHERE processed = 0
              AND (created_at > ? OR (created_at = ? AND seq > ?))
            ORDER BY created_at ASC, seq ASC
            LIMIT ?
            "#,
        )
        .bind(created_at)
        .bind(created_at)
        .bind(seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unprocessed events")?;

        Ok(rows.iter().map(row_to_queued_event).collect())
    }

    /// Mark an entry processed.
    ///
    /// Idempotent: only the first call sets `processed_at` and the audit tx id.
    /// Returns `true` if this call performed the transition.
    pub async fn mark_processed(
        &self,
        event_id: &EventId,
        destination_tx_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE event_queue
            SET processed = 1,
                processed_at = ?,
                destination_tx_id = ?
            WHERE event_id = ? AND processed = 0
            "#,
        )
        .bind(now_millis())
        .bind(destination_tx_id)
        .bind(event_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark event {} processed", event_id))?;

        Ok(result.rows_affected() == 1)
    }

    /// Fetch one entry by id.
    pub async fn get_event(&self, event_id: &EventId) -> Result<Option<QueuedEvent>> {
        let row = sqlx::query(
            r#"
            SELECT seq, event_id, transaction_hash, block_number, log_index, event_type,
                   args, user_context, user_address, processed, created_at,
                   processed_at, destination_tx_id
            FROM event_queue
            WHERE event_id = ?
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_queued_event))
    }

    /// Entries for one source address, newest first.
    pub async fn events_for_user(&self, source_address: &str, limit: u32) -> Result<Vec<QueuedEvent>> {
        let address = super::bindings::normalize_lookup(source_address);

        let rows = sqlx::query(
            r#"
            SELECT seq, event_id, transaction_hash, block_number, log_index, event_type,
                   args, user_context, user_address, processed, created_at,
                   processed_at, destination_tx_id
            FROM event_queue
            WHERE user_address = ?
            ORDER BY created_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(&address)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user events")?;

        Ok(rows.iter().map(row_to_queued_event).collect())
    }
}

/// Insert one event inside an open transaction.
async fn insert_event(
    conn: &mut SqliteConnection,
    record: &EventRecord,
    binder: &IdentityBinder,
) -> Result<bool> {
    let args = serde_json::to_string(&record.args).context("Failed to encode event args")?;
    let user_context = record
        .user_context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to encode user context")?;
    let user_address = record.user_address();
    let now = now_millis();

    let result = sqlx::query(
        r#"
        INSERT INTO event_queue (
            event_id, transaction_hash, block_number, log_index, event_type,
            args, user_context, user_address, processed, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        ON CONFLICT(event_id) DO NOTHING
        "#,
    )
    .bind(record.event_id.as_str())
    .bind(&record.transaction_hash)
    .bind(record.block_number as i64)
    .bind(record.log_index as i64)
    .bind(record.kind.as_str())
    .bind(&args)
    .bind(&user_context)
    .bind(&user_address)
    .bind(now)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to insert event {}", record.event_id))?;

    if result.rows_affected() == 0 {
        debug!(event_id = %record.event_id, "Event already queued");
        return Ok(false);
    }

    if let Some(address) = user_address {
        upsert_binding(conn, &address, record.user_context.as_ref(), binder, now).await?;
    }

    Ok(true)
}

/// Provision a binding for `address`, or refresh its cached presale state.
async fn upsert_binding(
    conn: &mut SqliteConnection,
    address: &str,
    context: Option<&UserContext>,
    binder: &IdentityBinder,
    now: i64,
) -> Result<()> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM identity_bindings WHERE source_address = ?")
            .bind(address)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up binding")?;

    let (rounds, purchase_details) = match context {
        Some(ctx) => (
            serde_json::to_string(&ctx.rounds)?,
            serde_json::to_string(&ctx.purchase_details)?,
        ),
        None => ("[]".to_string(), "{}".to_string()),
    };

    if exists.is_none() {
        let wallet = binder
            .issue()
            .with_context(|| format!("Failed to issue wallet for {}", address))?;

        sqlx::query(
            r#"
            INSERT INTO identity_bindings (
                source_address, destination_address, public_key,
                encrypted_mnemonic, encrypted_private_key,
                rounds, purchase_details, created_at, last_updated
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(address)
        .bind(&wallet.address)
        .bind(&wallet.public_key)
        .bind(&wallet.encrypted_mnemonic)
        .bind(&wallet.encrypted_private_key)
        .bind(&rounds)
        .bind(&purchase_details)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to insert binding for {}", address))?;

        info!(
            source = address,
            destination = %wallet.address,
            "Provisioned custodial wallet"
        );
    } else if context.is_some() {
        sqlx::query(
            r#"
            UPDATE identity_bindings
            SET rounds = ?, purchase_details = ?, last_updated = ?
            WHERE source_address = ?
            "#,
        )
        .bind(&rounds)
        .bind(&purchase_details)
        .bind(now)
        .bind(address)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to refresh binding for {}", address))?;
    }

    Ok(())
}

fn row_to_queued_event(row: &SqliteRow) -> QueuedEvent {
    let event_id: String = row.get("event_id");
    let args_raw: String = row.get("args");
    let context_raw: Option<String> = row.get("user_context");

    let args = decode_json_column(Some(&args_raw), "args", &event_id);
    let user_context = context_raw
        .as_deref()
        .and_then(|raw| decode_json_column::<Option<UserContext>>(Some(raw), "user_context", &event_id));

    QueuedEvent {
        seq: row.get("seq"),
        transaction_hash: row.get("transaction_hash"),
        block_number: row.get::<i64, _>("block_number") as u64,
        log_index: row.get::<i64, _>("log_index") as u64,
        event_type: row.get("event_type"),
        args,
        user_context,
        user_address: row.get("user_address"),
        processed: row.get::<i64, _>("processed") != 0,
        created_at: row.get("created_at"),
        processed_at: row.get("processed_at"),
        destination_tx_id: row.get("destination_tx_id"),
        event_id: EventId::from_raw(event_id),
    }
}

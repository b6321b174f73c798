//! Event ingestion: push subscription plus pull reconciliation into the durable queue.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures::StreamExt;
use meshbridge_core::{EventKind, UserContext};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::dedup::RecentEvents;
use super::events::RawEvent;
use super::provider::SourceChain;
use crate::config::IngestConfig;
use crate::custody::IdentityBinder;
use crate::storage::{EventRecord, Storage};

/// Result of one pull tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Range batches committed
    pub batches: u32,
    /// New queue rows
    pub inserted: usize,
    /// Cursor after the tick
    pub cursor: u64,
    /// Head observed at the start of the tick
    pub head: u64,
}

/// Merges the push and pull channels into one deduplicated stream of queue records.
pub struct EventIngestor {
    source: Arc<dyn SourceChain>,
    storage: Storage,
    binder: IdentityBinder,
    config: IngestConfig,
    seen: Mutex<RecentEvents>,
    notify: Arc<Notify>,
    consecutive_errors: AtomicU32,
    last_head: AtomicU64,
}

impl EventIngestor {
    /// Create an ingestor. `notify` is signalled after every fresh insert.
    pub fn new(
        source: Arc<dyn SourceChain>,
        storage: Storage,
        binder: IdentityBinder,
        config: IngestConfig,
        notify: Arc<Notify>,
    ) -> Self {
        let seen = Mutex::new(RecentEvents::new(config.dedup_capacity));
        Self {
            source,
            storage,
            binder,
            config,
            seen,
            notify,
            consecutive_errors: AtomicU32::new(0),
            last_head: AtomicU64::new(0),
        }
    }

    /// Ingest a single event from the push channel.
    ///
    /// Returns `true` if a new queue row was written.
    pub async fn ingest_one(&self, raw: RawEvent) -> Result<bool> {
        if self.seen.lock().await.contains(&raw.event_id) {
            debug!(event_id = %raw.event_id, "Skipping recently seen event");
            return Ok(false);
        }

        let context = self.enrich(&raw).await;
        let record = raw.into_record(context);

        let inserted = self
            .storage
            .enqueue(&record, &self.binder)
            .await
            .with_context(|| format!("Failed to enqueue {}", record.event_id))?;

        self.seen.lock().await.insert(record.event_id.clone());

        if inserted {
            self.announce(&record);
            self.notify.notify_one();
        }
        Ok(inserted)
    }

    /// One pull tick: scan `[cursor + 1, head]` in capped batches.
    ///
    /// Each batch is committed together with its cursor advance. A failure stops the
    /// tick and counts toward the forced-skip threshold.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let mut cursor = self.storage.get_sync_state().await?.last_block_number;

        let head = match self.source.head_block().await {
            Ok(head) => {
                self.last_head.store(head, Ordering::SeqCst);
                head
            }
            Err(e) => {
                self.on_pull_failure(cursor).await?;
                return Err(e.context("Failed to read source head block"));
            }
        };

        let mut summary = PollSummary {
            batches: 0,
            inserted: 0,
            cursor,
            head,
        };

        while cursor < head {
            let from = cursor + 1;
            let to = cursor.saturating_add(self.config.batch_size).min(head);

            match self.pull_range(from, to).await {
                Ok(inserted) => {
                    self.consecutive_errors.store(0, Ordering::SeqCst);
                    summary.batches += 1;
                    summary.inserted += inserted;
                    cursor = to;
                }
                Err(e) => {
                    self.on_pull_failure(cursor).await?;
                    return Err(e.context(format!("Pull of blocks {}..={} failed", from, to)));
                }
            }
        }

        summary.cursor = cursor;
        Ok(summary)
    }

    /// Fetch, enrich and durably ingest one block range.
    async fn pull_range(&self, from: u64, to: u64) -> Result<usize> {
        let mut raws = Vec::new();
        for kind in EventKind::ALL {
            raws.extend(self.source.query_range(from, to, kind).await?);
        }
        raws.sort_by_key(|e| (e.block_number, e.log_index));

        {
            let seen = self.seen.lock().await;
            raws.retain(|e| !seen.contains(&e.event_id));
        }

        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            let context = self.enrich(&raw).await;
            records.push(raw.into_record(context));
        }

        let inserted = self
            .storage
            .enqueue_batch(&records, &self.binder, to)
            .await?;

        {
            let mut seen = self.seen.lock().await;
            for record in &records {
                seen.insert(record.event_id.clone());
            }
        }

        debug!(from, to, found = records.len(), inserted, "Pulled block range");
        if inserted > 0 {
            info!(from, to, inserted, "Reconciled events from block range");
            self.notify.notify_one();
        }
        Ok(inserted)
    }

    async fn on_pull_failure(&self, cursor: u64) -> Result<()> {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(consecutive_errors = errors, cursor, "Pull attempt failed");

        if errors <= self.config.max_consecutive_errors {
            return Ok(());
        }

        let head = self.last_head.load(Ordering::SeqCst);
        let target = cursor.saturating_add(self.config.error_skip_blocks).min(head);
        if target > cursor {
            self.storage.force_advance(target).await?;
            error!(
                alert = "ingest_gap",
                from_block = cursor + 1,
                to_block = target,
                consecutive_errors = errors,
                "Skipped blocks after repeated pull failures; events in this range were not ingested"
            );
        }
        self.consecutive_errors.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Attach the acting user's presale state to purchase/claim events.
    async fn enrich(&self, raw: &RawEvent) -> Option<UserContext> {
        if !raw.kind.is_user_action() {
            return None;
        }

        let Some(user) = raw.args.first().and_then(|a| Address::from_str(a).ok()) else {
            warn!(event_id = %raw.event_id, "Event has no user address to enrich");
            return None;
        };

        match self.fetch_context(user).await {
            Ok(context) => Some(context),
            Err(e) => {
                warn!(
                    event_id = %raw.event_id,
                    user = %user,
                    "Enrichment failed, ingesting without user context: {:#}",
                    e
                );
                None
            }
        }
    }

    async fn fetch_context(&self, user: Address) -> Result<UserContext> {
        let rounds = self.source.user_rounds(user).await?;

        let mut purchase_details = BTreeMap::new();
        for round in &rounds {
            let purchase = self.source.user_round_purchase(user, *round).await?;
            purchase_details.insert(round.to_string(), purchase);
        }

        Ok(UserContext {
            address: user.to_checksum(None),
            rounds,
            purchase_details,
        })
    }

    fn announce(&self, record: &EventRecord) {
        info!(
            event_id = %record.event_id,
            event_type = %record.kind,
            block = record.block_number,
            "Queued new event"
        );
    }

    /// Push channel: keep a live subscription open, re-subscribing after the configured
    /// backoff whenever it fails or ends.
    pub async fn run_push(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Push channel starting...");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.source.subscribe().await {
                Ok(mut stream) => {
                    info!("Subscribed to presale events");
                    loop {
                        tokio::select! {
                            item = stream.next() => match item {
                                Some(raw) => {
                                    if let Err(e) = self.ingest_one(raw).await {
                                        warn!("Failed to ingest pushed event: {:#}", e);
                                    }
                                }
                                None => {
                                    warn!("Subscription ended");
                                    break;
                                }
                            },
                            _ = shutdown.changed() => {
                                info!("Push channel stopping");
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => warn!("Subscription failed: {:#}", e),
            }

            info!(
                backoff_secs = self.config.reconnect_backoff_secs,
                "Re-subscribing after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_backoff()) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Push channel stopping");
        Ok(())
    }

    /// Pull channel: reconcile on every poll interval.
    pub async fn run_pull(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "Pull channel starting..."
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(summary) if summary.batches > 0 => debug!(
                            cursor = summary.cursor,
                            head = summary.head,
                            inserted = summary.inserted,
                            "Pull tick complete"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!("Pull tick failed: {:#}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Pull channel stopping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::test_binder;
    use crate::listener::provider::mock::MockSource;
    use crate::storage::tests::setup_storage;
    use alloy::primitives::B256;
    use meshbridge_core::EventId;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const BUYER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn raw(kind: EventKind, block: u64, log_index: u64) -> RawEvent {
        let tx = B256::repeat_byte(block as u8);
        let args = match kind {
            EventKind::RoundCreated => vec!["1".into(), "0".into(), "10".into(), "5".into()],
            _ => vec![BUYER.into(), "1".into(), "1000000000000000000".into(), "2".into()],
        };
        RawEvent {
            event_id: EventId::from_parts(&tx, log_index),
            transaction_hash: tx,
            block_number: block,
            log_index,
            kind,
            args,
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            batch_size: 10,
            reconnect_backoff_secs: 0,
            ..Default::default()
        }
    }

    async fn setup(
        config: IngestConfig,
    ) -> (Arc<EventIngestor>, Arc<MockSource>, Storage, Arc<Notify>, NamedTempFile) {
        let (storage, temp_db) = setup_storage().await;
        let source = Arc::new(MockSource::default());
        let notify = Arc::new(Notify::new());
        let ingestor = Arc::new(EventIngestor::new(
            source.clone(),
            storage.clone(),
            test_binder(),
            config,
            notify.clone(),
        ));
        (ingestor, source, storage, notify, temp_db)
    }

    #[tokio::test]
    async fn test_push_then_pull_ingests_once() {
        let (ingestor, source, storage, notify, _temp_db) = setup(config()).await;
        let event = raw(EventKind::TokensBought, 5, 0);

        assert!(ingestor.ingest_one(event.clone()).await.unwrap());
        assert!(tokio::time::timeout(Duration::from_secs(1), notify.notified())
            .await
            .is_ok());
        assert!(!ingestor.ingest_one(event.clone()).await.unwrap());

        source.push_event(event);
        source.head.store(8, Ordering::SeqCst);
        let summary = ingestor.poll_once().await.unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.cursor, 8);

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.event_count, 1);
        assert_eq!(stats.binding_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_after_dedup_eviction_is_still_single_row() {
        let (ingestor, _source, storage, _notify, _temp_db) = setup(IngestConfig {
            dedup_capacity: 1,
            ..config()
        })
        .await;

        let first = raw(EventKind::RoundCreated, 1, 0);
        ingestor.ingest_one(first.clone()).await.unwrap();
        ingestor.ingest_one(raw(EventKind::RoundCreated, 2, 0)).await.unwrap();

        // Evicted from the fast path, rejected by the unique key
        assert!(!ingestor.ingest_one(first).await.unwrap());
        assert_eq!(storage.stats().await.unwrap().event_count, 2);
    }

    #[tokio::test]
    async fn test_enrichment_attaches_user_context() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        source
            .rounds
            .lock()
            .unwrap()
            .insert(Address::from_str(BUYER).unwrap(), vec![1, 2]);

        let event = raw(EventKind::TokensBought, 3, 1);
        ingestor.ingest_one(event.clone()).await.unwrap();

        let queued = storage.get_event(&event.event_id).await.unwrap().unwrap();
        let context = queued.user_context.unwrap();
        assert_eq!(context.rounds, vec![1, 2]);
        assert_eq!(context.purchase_details["2"].amount_bought, "2000");

        let binding = storage.binding_for(BUYER).await.unwrap().unwrap();
        assert_eq!(binding.rounds, vec![1, 2]);
        assert!(binding.purchase_details["2"].cliff_completed);
    }

    #[tokio::test]
    async fn test_enrichment_failure_still_ingests() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        source.fail_enrichment.store(true, Ordering::SeqCst);

        let event = raw(EventKind::TokensClaimed, 3, 0);
        assert!(ingestor.ingest_one(event.clone()).await.unwrap());

        let queued = storage.get_event(&event.event_id).await.unwrap().unwrap();
        assert!(queued.user_context.is_none());
        assert!(queued.user_address.is_some());
        assert!(storage.binding_for(BUYER).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capped_pull_advances_batch_by_batch() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        source.push_event(raw(EventKind::RoundCreated, 4, 0));
        source.push_event(raw(EventKind::TokensBought, 17, 2));
        source.push_event(raw(EventKind::TokensBought, 17, 1));
        source.push_event(raw(EventKind::TokensClaimed, 33, 0));
        source.head.store(35, Ordering::SeqCst);

        let summary = ingestor.poll_once().await.unwrap();
        assert_eq!(summary.batches, 4);
        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.cursor, 35);
        assert_eq!(source.query_calls.load(Ordering::SeqCst), 12);
        assert_eq!(storage.get_sync_state().await.unwrap().last_block_number, 35);

        let pending = storage.unprocessed(10).await.unwrap();
        let order: Vec<(u64, u64)> = pending.iter().map(|e| (e.block_number, e.log_index)).collect();
        assert_eq!(order, vec![(4, 0), (17, 1), (17, 2), (33, 0)]);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_advance_cursor() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        source.push_event(raw(EventKind::RoundCreated, 4, 0));
        source.head.store(20, Ordering::SeqCst);
        source.fail_queries.store(true, Ordering::SeqCst);

        assert!(ingestor.poll_once().await.is_err());
        assert_eq!(storage.get_sync_state().await.unwrap().last_block_number, 0);
        assert_eq!(storage.stats().await.unwrap().event_count, 0);

        source.fail_queries.store(false, Ordering::SeqCst);
        let summary = ingestor.poll_once().await.unwrap();
        assert_eq!(summary.cursor, 20);
        assert_eq!(storage.stats().await.unwrap().event_count, 1);
    }

    #[tokio::test]
    async fn test_consecutive_errors_trigger_bounded_skip() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        source.head.store(1000, Ordering::SeqCst);
        source.fail_queries.store(true, Ordering::SeqCst);

        for _ in 0..3 {
            assert!(ingestor.poll_once().await.is_err());
            assert_eq!(storage.get_sync_state().await.unwrap().last_block_number, 0);
        }

        assert!(ingestor.poll_once().await.is_err());
        assert_eq!(storage.get_sync_state().await.unwrap().last_block_number, 100);

        // Counter was reset: three more failures before the next skip
        for _ in 0..3 {
            assert!(ingestor.poll_once().await.is_err());
        }
        assert_eq!(storage.get_sync_state().await.unwrap().last_block_number, 100);
    }

    #[tokio::test]
    async fn test_forced_skip_never_passes_head() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        source.head.store(40, Ordering::SeqCst);
        source.fail_queries.store(true, Ordering::SeqCst);

        for _ in 0..4 {
            assert!(ingestor.poll_once().await.is_err());
        }
        assert_eq!(storage.get_sync_state().await.unwrap().last_block_number, 40);
    }

    #[tokio::test]
    async fn test_push_channel_resubscribes() {
        let (ingestor, source, storage, _notify, _temp_db) = setup(config()).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(ingestor.clone().run_push(shutdown_rx));

        async fn wait_for<F: Fn() -> bool>(cond: F) {
            for _ in 0..200 {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("condition not reached");
        }

        wait_for(|| !source.subscribers.lock().unwrap().is_empty()).await;
        source.broadcast(raw(EventKind::RoundCreated, 1, 0));

        source.disconnect();
        wait_for(|| !source.subscribers.lock().unwrap().is_empty()).await;
        source.broadcast(raw(EventKind::RoundCreated, 2, 0));

        for _ in 0..200 {
            if storage.stats().await.unwrap().event_count == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(storage.stats().await.unwrap().event_count, 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

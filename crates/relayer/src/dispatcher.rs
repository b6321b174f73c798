//! Relay dispatcher: drains the event queue into destination chain transactions.
//!
//! Each pass walks the unprocessed entries oldest first and handles up to `batch_size`
//! of them one at a time. Only a successful relay (or a permanent no-op) flips an entry
//! to processed. A failed account is blocked for the rest of the pass so its events stay
//! in order; the pass pages past its entries so other accounts still make progress.

use anyhow::Result;
use meshbridge_core::{
    amount_arg, user_arg, AmountScale, CoreError, EventKind, MEMO_ACTION_BURN, MEMO_ACTION_MINT,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::custody::{CustodyError, IdentityBinder, SigningSecret};
use crate::destination::{
    submit_with_fresh_sequence, DestinationChain, DestinationError, TransferMemo, TransferRequest,
};
use crate::storage::{IdentityBinding, QueuedEvent, Storage};

/// Why an event could not be relayed.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No binding exists for the acting source address.
    #[error("no identity binding for {0}")]
    MissingBinding(String),

    /// Event arguments can never be relayed.
    #[error("malformed event {event_id}: {reason}")]
    MalformedEvent {
        /// Queue entry
        event_id: String,
        /// What is wrong with it
        reason: CoreError,
    },

    /// Destination chain refused or was unreachable.
    #[error(transparent)]
    Destination(#[from] DestinationError),

    /// Binding secrets could not be unsealed.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// Queue access failed.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Entries visited in the queue, including skipped ones
    pub fetched: usize,
    /// Relayed and marked processed
    pub relayed: usize,
    /// Marked processed without a destination call
    pub ignored: usize,
    /// Left unprocessed after a failure
    pub failed: usize,
    /// Left unprocessed because their account was blocked earlier in the pass
    pub skipped: usize,
}

enum Outcome {
    Relayed(String),
    Ignored,
}

/// Single-owner dispatcher. `&mut self` on the pass keeps passes from overlapping.
pub struct RelayDispatcher {
    storage: Storage,
    binder: IdentityBinder,
    destination: Arc<dyn DestinationChain>,
    bridge: SigningSecret,
    bridge_address: String,
    scale: AmountScale,
    token_symbol: String,
    config: DispatchConfig,
}

impl RelayDispatcher {
    /// Create a dispatcher signing mints with the `bridge` wallet.
    pub fn new(
        storage: Storage,
        binder: IdentityBinder,
        destination: Arc<dyn DestinationChain>,
        bridge: SigningSecret,
        scale: AmountScale,
        token_symbol: impl Into<String>,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        let bridge_address = bridge.address(binder.address_prefix())?;
        Ok(Self {
            storage,
            binder,
            destination,
            bridge,
            bridge_address,
            scale,
            token_symbol: token_symbol.into(),
            config,
        })
    }

    /// Destination address of the bridge wallet.
    pub fn bridge_address(&self) -> &str {
        &self.bridge_address
    }

    /// Run one pass, handling up to `batch_size` of the oldest dispatchable entries.
    pub async fn dispatch_pass(&mut self) -> Result<PassSummary, DispatchError> {
        self.pass(None).await
    }

    async fn pass(
        &mut self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<PassSummary, DispatchError> {
        let budget = self.config.batch_size as usize;
        let mut summary = PassSummary::default();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut attempted = 0;
        let mut position = None;

        'pages: while attempted < budget {
            let page = self
                .storage
                .unprocessed_after(position, self.config.batch_size)
                .await
                .map_err(DispatchError::Storage)?;
            let Some(last) = page.last() else {
                break;
            };
            position = Some((last.created_at, last.seq));

            for event in page {
                if attempted >= budget {
                    break 'pages;
                }
                if shutdown.is_some_and(|rx| *rx.borrow()) {
                    info!("Shutdown requested, ending dispatch pass early");
                    break 'pages;
                }
                summary.fetched += 1;

                if let Some(account) = &event.user_address {
                    if blocked.contains(account) {
                        debug!(event_id = %event.event_id, account = %account, "Account blocked for this pass");
                        summary.skipped += 1;
                        continue;
                    }
                }
                attempted += 1;

                self.handle(&event, &mut blocked, &mut summary).await?;
            }
        }

        Ok(summary)
    }

    /// Dispatch one entry and record its outcome.
    async fn handle(
        &self,
        event: &QueuedEvent,
        blocked: &mut HashSet<String>,
        summary: &mut PassSummary,
    ) -> Result<(), DispatchError> {
        match self.dispatch_event(event).await {
            Ok(Outcome::Relayed(tx_id)) => {
                self.mark_processed(event, Some(&tx_id)).await?;
                info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    tx_id = %tx_id,
                    "Relayed event"
                );
                summary.relayed += 1;
            }
            Ok(Outcome::Ignored) => {
                self.mark_processed(event, None).await?;
                summary.ignored += 1;
            }
            Err(DispatchError::MalformedEvent { event_id, reason }) => {
                error!(
                    event_id = %event_id,
                    event_type = %event.event_type,
                    "Dropping malformed event: {}",
                    reason
                );
                self.mark_processed(event, None).await?;
                summary.ignored += 1;
            }
            Err(DispatchError::MissingBinding(account)) => {
                error!(
                    alert = "missing_binding",
                    event_id = %event.event_id,
                    account = %account,
                    "No identity binding for event account, leaving it queued"
                );
                blocked.insert(account);
                summary.failed += 1;
            }
            Err(DispatchError::Storage(e)) => return Err(DispatchError::Storage(e)),
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    "Dispatch failed, will retry next pass: {}",
                    e
                );
                if let Some(account) = event.user_address.clone() {
                    blocked.insert(account);
                }
                summary.failed += 1;
            }
        }
        Ok(())
    }

    async fn dispatch_event(&self, event: &QueuedEvent) -> Result<Outcome, DispatchError> {
        let Some(kind) = event.kind() else {
            warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Unknown event type, marking processed without action"
            );
            return Ok(Outcome::Ignored);
        };

        match kind {
            EventKind::RoundCreated => {
                debug!(event_id = %event.event_id, "Round created, nothing to relay");
                Ok(Outcome::Ignored)
            }
            EventKind::TokensBought | EventKind::TokensClaimed => {
                let malformed = |reason: CoreError| DispatchError::MalformedEvent {
                    event_id: event.event_id.to_string(),
                    reason,
                };
                let amount = amount_arg(&event.args)
                    .and_then(|raw| self.scale.to_destination(raw))
                    .map_err(malformed)?;
                let account = match &event.user_address {
                    Some(account) => account.clone(),
                    None => user_arg(&event.args).map_err(malformed)?,
                };

                let binding = self
                    .storage
                    .binding_for(&account)
                    .await
                    .map_err(DispatchError::Storage)?
                    .ok_or(DispatchError::MissingBinding(account))?;

                let tx_id = if kind == EventKind::TokensBought {
                    self.mint(&binding, amount).await?
                } else {
                    self.burn(&binding, amount).await?
                };
                Ok(Outcome::Relayed(tx_id))
            }
        }
    }

    /// Bridge wallet pays the bound wallet.
    async fn mint(&self, binding: &IdentityBinding, amount: u64) -> Result<String, DispatchError> {
        let transfer = TransferRequest {
            recipient: binding.destination_address.clone(),
            amount,
            memo: self.memo(MEMO_ACTION_MINT),
        };
        let destination = self.destination.as_ref();
        let tx_id = submit_with_fresh_sequence(destination, &self.bridge_address, |sequence| {
            destination.submit_transfer(&transfer, sequence, &self.bridge)
        })
        .await?;
        Ok(tx_id)
    }

    /// Bound wallet pays the bridge wallet, signed with its unsealed key.
    async fn burn(&self, binding: &IdentityBinding, amount: u64) -> Result<String, DispatchError> {
        let signer = self.binder.unseal(binding)?;
        let transfer = TransferRequest {
            recipient: self.bridge_address.clone(),
            amount,
            memo: self.memo(MEMO_ACTION_BURN),
        };
        let destination = self.destination.as_ref();
        let tx_id =
            submit_with_fresh_sequence(destination, &binding.destination_address, |sequence| {
                destination.submit_transfer(&transfer, sequence, &signer)
            })
            .await?;
        Ok(tx_id)
    }

    fn memo(&self, action: &str) -> TransferMemo {
        TransferMemo {
            action: action.to_string(),
            token: self.token_symbol.clone(),
        }
    }

    async fn mark_processed(
        &self,
        event: &QueuedEvent,
        tx_id: Option<&str>,
    ) -> Result<(), DispatchError> {
        let flipped = self
            .storage
            .mark_processed(&event.event_id, tx_id)
            .await
            .map_err(|e| {
                if let Some(tx_id) = tx_id {
                    error!(
                        alert = "unrecorded_relay",
                        event_id = %event.event_id,
                        tx_id = %tx_id,
                        "Relayed event could not be marked processed"
                    );
                }
                DispatchError::Storage(e)
            })?;
        if !flipped {
            debug!(event_id = %event.event_id, "Event was already processed");
        }
        Ok(())
    }

    /// Dispatch loop: a pass on every interval tick and on every ingestor wake-up.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        wake: Arc<Notify>,
    ) -> Result<()> {
        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            bridge = %self.bridge_address,
            "Dispatcher starting..."
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wake.notified() => debug!("Dispatcher woken by ingestor"),
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.pass(Some(&shutdown)).await {
                Ok(summary) if summary.fetched > 0 => info!(
                    fetched = summary.fetched,
                    relayed = summary.relayed,
                    ignored = summary.ignored,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Dispatch pass complete"
                ),
                Ok(_) => {}
                Err(e) => warn!("Dispatch pass failed: {}", e),
            }
        }

        info!("Dispatcher stopping");
        Ok(())
    }
}

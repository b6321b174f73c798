//! Source chain access: the [`SourceChain`] port and its alloy RPC implementation.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use meshbridge_core::{EventKind, RoundPurchase};

use super::events::{signature_hash, IPresale, RawEvent};

/// Read-only access to the presale contract.
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Latest block number.
    async fn head_block(&self) -> Result<u64>;

    /// Events of one kind in `[from, to]`.
    async fn query_range(&self, from: u64, to: u64, kind: EventKind) -> Result<Vec<RawEvent>>;

    /// Live stream of all relayed events. Ends when the transport drops.
    async fn subscribe(&self) -> Result<BoxStream<'static, RawEvent>>;

    /// Rounds a user participated in.
    async fn user_rounds(&self, user: Address) -> Result<Vec<u64>>;

    /// A user's purchase state in one round.
    async fn user_round_purchase(&self, user: Address, round_id: u64) -> Result<RoundPurchase>;
}

/// HTTP RPC provider, with an optional WebSocket endpoint for subscriptions.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
    ws_url: Option<String>,
    presale: Address,
}

impl RpcProvider {
    /// Create a new RPC provider.
    pub fn new(rpc_url: &str, ws_url: Option<String>, presale: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self {
            provider,
            ws_url,
            presale,
        })
    }

    fn all_events_filter(&self) -> Filter {
        let signatures: Vec<_> = EventKind::ALL.into_iter().map(signature_hash).collect();
        Filter::new().address(self.presale).event_signature(signatures)
    }
}

fn decode_logs(logs: &[Log]) -> Vec<RawEvent> {
    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        if log.removed {
            continue;
        }
        match RawEvent::from_log(log) {
            Ok(event) => events.push(event),
            Err(e) => {
                // Keep the rest of the range
                tracing::warn!("Failed to parse presale event: {:#}", e);
            }
        }
    }
    events
}

fn to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("{} out of range: {}", what, value))
}

#[async_trait]
impl SourceChain for RpcProvider {
    async fn head_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    async fn query_range(&self, from: u64, to: u64, kind: EventKind) -> Result<Vec<RawEvent>> {
        let filter = Filter::new()
            .address(self.presale)
            .event_signature(signature_hash(kind))
            .from_block(from)
            .to_block(to);

        let logs: Vec<Log> = self
            .provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("Failed to fetch {} logs for {}..={}", kind, from, to))?;

        Ok(decode_logs(&logs))
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, RawEvent>> {
        let ws_url = self
            .ws_url
            .clone()
            .context("No WebSocket URL configured for the source chain")?;

        let ws_provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(ws_url))
            .await
            .context("Failed to connect WebSocket provider")?;

        let subscription = ws_provider
            .subscribe_logs(&self.all_events_filter())
            .await
            .context("Failed to subscribe to presale logs")?;

        // The stream owns the provider so the connection lives as long as the stream.
        let stream = subscription.into_stream().filter_map(move |log| {
            let _connection = &ws_provider;
            std::future::ready(decode_logs(std::slice::from_ref(&log)).pop())
        });

        Ok(stream.boxed())
    }

    async fn user_rounds(&self, user: Address) -> Result<Vec<u64>> {
        let presale = IPresale::new(self.presale, self.provider.clone());
        let rounds = presale
            .getUserRounds(user)
            .call()
            .await
            .with_context(|| format!("getUserRounds({}) failed", user))?
            ._0;

        rounds.into_iter().map(|r| to_u64(r, "round id")).collect()
    }

    async fn user_round_purchase(&self, user: Address, round_id: u64) -> Result<RoundPurchase> {
        let presale = IPresale::new(self.presale, self.provider.clone());
        let purchase = presale
            .getUserRoundPurchase(user, U256::from(round_id))
            .call()
            .await
            .with_context(|| format!("getUserRoundPurchase({}, {}) failed", user, round_id))?;

        Ok(RoundPurchase {
            amount_bought: purchase.amountBought.to_string(),
            amount_claimed: purchase.amountClaimed.to_string(),
            total_claimable: purchase.totalClaimable.to_string(),
            cliff_completed: purchase.cliffCompleted,
            last_claim_time: to_u64(purchase.lastClaimTime, "lastClaimTime")?,
            unclaimed_periods_passed: purchase.unclaimedPeriodsPassed.to_string(),
        })
    }
}

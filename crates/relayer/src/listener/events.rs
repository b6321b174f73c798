//! Presale contract bindings and log decoding.

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use meshbridge_core::{EventId, EventKind, UserContext};

use crate::storage::EventRecord;

sol! {
    /// Presale contract: the three relayed events and the per-user view calls.
    #[sol(rpc)]
    interface IPresale {
        event RoundCreated(
            uint256 indexed roundId,
            uint256 startTime,
            uint256 endTime,
            uint256 tokenPrice
        );

        event TokensBought(
            address indexed buyer,
            uint256 indexed roundId,
            uint256 amount,
            uint256 cost
        );

        event TokensClaimed(
            address indexed user,
            uint256 indexed roundId,
            uint256 amount
        );

        function getUserRounds(address user) external view returns (uint256[] memory);

        function getUserRoundPurchase(address user, uint256 roundId)
            external
            view
            returns (
                uint256 amountBought,
                uint256 amountClaimed,
                uint256 totalClaimable,
                bool cliffCompleted,
                uint256 lastClaimTime,
                uint256 unclaimedPeriodsPassed
            );
    }
}

/// Topic0 of an event kind.
pub fn signature_hash(kind: EventKind) -> B256 {
    match kind {
        EventKind::RoundCreated => IPresale::RoundCreated::SIGNATURE_HASH,
        EventKind::TokensBought => IPresale::TokensBought::SIGNATURE_HASH,
        EventKind::TokensClaimed => IPresale::TokensClaimed::SIGNATURE_HASH,
    }
}

/// A decoded presale log before enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Stable identity
    pub event_id: EventId,

    /// Transaction hash
    pub transaction_hash: B256,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,

    /// Event type
    pub kind: EventKind,

    /// Parameters in declaration order
    pub args: Vec<String>,
}

impl RawEvent {
    /// Decode a presale log.
    pub fn from_log(log: &Log) -> Result<Self> {
        let topic0 = *log.inner.data.topics().first().context("Log has no topics")?;
        let kind = EventKind::ALL
            .into_iter()
            .find(|kind| signature_hash(*kind) == topic0)
            .with_context(|| format!("Unrecognised event signature {topic0}"))?;

        let args = match kind {
            EventKind::RoundCreated => {
                let ev = IPresale::RoundCreated::decode_log(log.as_ref(), true)
                    .context("Failed to decode RoundCreated event")?;
                vec![
                    ev.roundId.to_string(),
                    ev.startTime.to_string(),
                    ev.endTime.to_string(),
                    ev.tokenPrice.to_string(),
                ]
            }
            EventKind::TokensBought => {
                let ev = IPresale::TokensBought::decode_log(log.as_ref(), true)
                    .context("Failed to decode TokensBought event")?;
                vec![
                    ev.buyer.to_checksum(None),
                    ev.roundId.to_string(),
                    ev.amount.to_string(),
                    ev.cost.to_string(),
                ]
            }
            EventKind::TokensClaimed => {
                let ev = IPresale::TokensClaimed::decode_log(log.as_ref(), true)
                    .context("Failed to decode TokensClaimed event")?;
                vec![
                    ev.user.to_checksum(None),
                    ev.roundId.to_string(),
                    ev.amount.to_string(),
                ]
            }
        };

        let block_number = log.block_number.context("Log missing block_number")?;
        let log_index = log.log_index.context("Log missing log_index")?;
        let transaction_hash = log
            .transaction_hash
            .context("Log missing transaction_hash")?;

        Ok(Self {
            event_id: EventId::from_parts(&transaction_hash, log_index),
            transaction_hash,
            block_number,
            log_index,
            kind,
            args,
        })
    }

    /// Attach the enrichment result and produce a queue record.
    pub fn into_record(self, user_context: Option<UserContext>) -> EventRecord {
        EventRecord {
            event_id: self.event_id,
            transaction_hash: format!("{:#x}", self.transaction_hash),
            block_number: self.block_number,
            log_index: self.log_index,
            kind: self.kind,
            args: self.args,
            user_context,
        }
    }
}

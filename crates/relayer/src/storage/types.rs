//! Database types for the relay storage layer.

use meshbridge_core::{normalize_address, user_arg, EventId, EventKind, RoundPurchase, UserContext};
use std::collections::BTreeMap;

/// An observed source-chain event, ready to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Stable identity (`{tx_hash}-{log_index}`)
    pub event_id: EventId,

    /// Transaction hash (0x-prefixed hex)
    pub transaction_hash: String,

    /// Block number where the event occurred
    pub block_number: u64,

    /// Log index within the block
    pub log_index: u64,

    /// Event type
    pub kind: EventKind,

    /// Raw event parameters (addresses as checksummed hex, integers as decimal strings)
    pub args: Vec<String>,

    /// Snapshot of the acting user's presale state, when enrichment succeeded
    pub user_context: Option<UserContext>,
}

impl EventRecord {
    /// Acting source address: the context address, or `args[0]` for user actions.
    pub fn user_address(&self) -> Option<String> {
        if let Some(ctx) = &self.user_context {
            if let Ok(address) = normalize_address(&ctx.address) {
                return Some(address);
            }
        }
        if self.kind.is_user_action() {
            return user_arg(&self.args).ok();
        }
        None
    }
}

/// A persisted queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    /// Insertion sequence (tie-breaker for FIFO order)
    pub seq: i64,

    /// Stable identity
    pub event_id: EventId,

    /// Transaction hash
    pub transaction_hash: String,

    /// Block number
    pub block_number: u64,

    /// Log index
    pub log_index: u64,

    /// Raw type tag, possibly one this build does not know
    pub event_type: String,

    /// Raw event parameters
    pub args: Vec<String>,

    /// Enrichment snapshot
    pub user_context: Option<UserContext>,

    /// Acting source address (lowercase hex)
    pub user_address: Option<String>,

    /// Whether the dispatcher has finished with this entry
    pub processed: bool,

    /// Enqueue time (unix millis)
    pub created_at: i64,

    /// Time of the processed transition (unix millis)
    pub processed_at: Option<i64>,

    /// Destination transaction that processed this entry
    pub destination_tx_id: Option<String>,
}

impl QueuedEvent {
    /// Known event kind, `None` for unknown tags.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }
}

/// Custodial mapping from a source address to a destination wallet.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityBinding {
    /// Source address (lowercase hex)
    pub source_address: String,

    /// Destination address (immutable once created)
    pub destination_address: String,

    /// Compressed public key, hex
    pub public_key: String,

    /// Sealed mnemonic
    pub encrypted_mnemonic: Vec<u8>,

    /// Sealed private key
    pub encrypted_private_key: Vec<u8>,

    /// Rounds the user participated in (latest known)
    pub rounds: Vec<u64>,

    /// Purchase state per round (latest known)
    pub purchase_details: BTreeMap<String, RoundPurchase>,

    /// Creation time (unix millis)
    pub created_at: i64,

    /// Last cache refresh (unix millis)
    pub last_updated: i64,
}

impl std::fmt::Debug for IdentityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBinding")
            .field("source_address", &self.source_address)
            .field("destination_address", &self.destination_address)
            .field("public_key", &self.public_key)
            .field("rounds", &self.rounds)
            .field("created_at", &self.created_at)
            .field("last_updated", &self.last_updated)
            .finish_non_exhaustive()
    }
}

/// Pull-channel cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    /// Last block whose events are durably ingested
    pub last_block_number: u64,

    /// Source chain ID
    pub chain_id: u64,

    /// Whether the cursor has been initialised
    pub initialized: bool,

    /// Last update (unix seconds)
    pub updated_at: i64,
}

/// Queue and binding counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total queue entries
    pub event_count: u64,

    /// Entries awaiting dispatch
    pub unprocessed_count: u64,

    /// Entries already dispatched
    pub processed_count: u64,

    /// Custodial bindings
    pub binding_count: u64,

    /// Pull cursor
    pub last_block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: EventKind, args: &[&str], ctx: Option<UserContext>) -> EventRecord {
        EventRecord {
            event_id: EventId::from_raw("0xabc-0"),
            transaction_hash: "0xabc".to_string(),
            block_number: 1,
            log_index: 0,
            kind,
            args: args.iter().map(|s| s.to_string()).collect(),
            user_context: ctx,
        }
    }

    #[test]
    fn test_user_address_resolution() {
        let buyer = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

        let bought = record(EventKind::TokensBought, &[buyer, "1", "10"], None);
        assert_eq!(
            bought.user_address().as_deref(),
            Some("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
        );

        let ctx = UserContext {
            address: "0x1111111111111111111111111111111111111111".to_string(),
            ..Default::default()
        };
        let with_ctx = record(EventKind::TokensClaimed, &[buyer, "1", "10"], Some(ctx));
        assert_eq!(
            with_ctx.user_address().as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );

        let round = record(EventKind::RoundCreated, &["1", "0", "10", "5"], None);
        assert_eq!(round.user_address(), None);
    }
}

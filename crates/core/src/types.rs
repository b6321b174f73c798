//! Core types for meshbridge.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::{AMOUNT_ARG_INDEX, USER_ARG_INDEX};
use crate::error::CoreError;

/// Presale contract event types the relay understands.
///
/// Persisted rows may carry other tags; those parse to `None` via
/// [`EventKind::parse`] and are treated as unknown events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A new presale round was opened.
    RoundCreated,
    /// A user bought tokens in a round.
    TokensBought,
    /// A user claimed vested tokens.
    TokensClaimed,
}

impl EventKind {
    /// Every kind, in the order the pull channel queries them.
    pub const ALL: [EventKind; 3] = [
        EventKind::RoundCreated,
        EventKind::TokensBought,
        EventKind::TokensClaimed,
    ];

    /// Tag stored in the `event_type` column.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::RoundCreated => "RoundCreated",
            EventKind::TokensBought => "TokensBought",
            EventKind::TokensClaimed => "TokensClaimed",
        }
    }

    /// Lenient parse for persisted tags.
    pub fn parse(tag: &str) -> Option<Self> {
        tag.parse().ok()
    }

    /// Whether events of this kind act on behalf of a user.
    pub const fn is_user_action(&self) -> bool {
        matches!(self, EventKind::TokensBought | EventKind::TokensClaimed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RoundCreated" => Ok(EventKind::RoundCreated),
            "TokensBought" => Ok(EventKind::TokensBought),
            "TokensClaimed" => Ok(EventKind::TokensClaimed),
            other => Err(CoreError::UnknownEventType(other.to_string())),
        }
    }
}

/// Stable identity of one source-chain log: `"{tx_hash}-{log_index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Derive the id from log provenance.
    pub fn from_parts(tx_hash: &B256, log_index: u64) -> Self {
        EventId(format!("{tx_hash:#x}-{log_index}"))
    }

    /// Wrap an id that was already persisted.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        EventId(raw.into())
    }

    /// Borrow the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-round purchase/claim state of a user, as reported by the presale contract.
///
/// Token quantities are kept as decimal strings so the snapshot survives JSON
/// without precision loss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundPurchase {
    /// Tokens bought in the round.
    pub amount_bought: String,
    /// Tokens already claimed.
    pub amount_claimed: String,
    /// Tokens claimable in total.
    pub total_claimable: String,
    /// Whether the vesting cliff has passed.
    pub cliff_completed: bool,
    /// Unix timestamp of the last claim.
    pub last_claim_time: u64,
    /// Vesting periods elapsed since the last claim.
    pub unclaimed_periods_passed: String,
}

/// Snapshot of a user's presale state attached to purchase/claim events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    /// Acting source-chain address.
    pub address: String,
    /// Round ids the user participated in.
    pub rounds: Vec<u64>,
    /// Purchase state keyed by round id (decimal string).
    pub purchase_details: BTreeMap<String, RoundPurchase>,
}

/// Normalise a source-chain address to lowercase `0x` hex.
pub fn normalize_address(raw: &str) -> Result<String, CoreError> {
    let address =
        Address::from_str(raw.trim()).map_err(|_| CoreError::InvalidAddress(raw.to_string()))?;
    Ok(format!("{address:#x}"))
}

/// Acting user address from an event's raw args.
pub fn user_arg(args: &[String]) -> Result<String, CoreError> {
    let raw = args.get(USER_ARG_INDEX).ok_or(CoreError::MissingArgument {
        index: USER_ARG_INDEX,
        name: "user",
    })?;
    normalize_address(raw).map_err(|_| CoreError::InvalidArgument {
        index: USER_ARG_INDEX,
        name: "user",
        reason: format!("not an address: {raw}"),
    })
}

/// Token amount (source units) from an event's raw args.
pub fn amount_arg(args: &[String]) -> Result<U256, CoreError> {
    let raw = args.get(AMOUNT_ARG_INDEX).ok_or(CoreError::MissingArgument {
        index: AMOUNT_ARG_INDEX,
        name: "amount",
    })?;
    U256::from_str_radix(raw, 10).map_err(|e| CoreError::InvalidArgument {
        index: AMOUNT_ARG_INDEX,
        name: "amount",
        reason: e.to_string(),
    })
}

//! # meshbridge Core
//!
//! Shared domain types for the meshbridge presale relay.
//!
//! This crate holds the vocabulary used by both the relayer and the HTTP API, so that the
//! queue, the dispatcher and the request handlers agree on event tags, ids and amounts.
//!
//! ## Features
//!
//! - **Event Types**: `EventKind`, `EventId`, and argument accessors
//! - **User State**: `UserContext` / `RoundPurchase` snapshots from the presale contract
//! - **Amounts**: `AmountScale` converting source token units to destination units

#![warn(missing_docs)]

pub mod amount;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use amount::AmountScale;
pub use constants::*;
pub use error::{CoreError, Result};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};

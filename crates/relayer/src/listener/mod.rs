//! Source chain listener for presale events.
//!
//! This module provides:
//! - Contract bindings and log decoding
//! - The `SourceChain` port and its RPC implementation
//! - The ingestor merging push and pull channels into the durable queue

pub mod dedup;
pub mod events;
pub mod ingestor;
pub mod provider;

pub use events::RawEvent;
pub use ingestor::{EventIngestor, PollSummary};
pub use provider::{RpcProvider, SourceChain};

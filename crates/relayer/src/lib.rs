//! Presale event relay between a source EVM chain and a destination ledger.
//!
//! This crate provides:
//! - Event ingestion from the presale contract (push subscription + pull reconciliation)
//! - A durable SQLite queue with idempotent inserts
//! - Custodial destination wallets bound to source addresses
//! - The dispatcher relaying purchases (mint) and claims (burn)
//! - Delegate votes signed with custodial wallets
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────┐
//! │  meshbridge-relayer (this)        │
//! │                                   │
//! │  ┌──────────────┐                 │
//! │  │  Ingestor    │ ← Source RPC    │
//! │  │  push + pull │   (ws + http)   │
//! │  └──────┬───────┘                 │
//! │         │ enqueue + bind          │
//! │    ┌────▼──────┐                  │
//! │    │  Storage  │ ← SQLite         │
//! │    │  (queue)  │                  │
//! │    └────┬──────┘                  │
//! │         │ Notify                  │
//! │  ┌──────▼───────┐                 │
//! │  │  Dispatcher  │ → Destination   │
//! │  │  mint / burn │   node (REST)   │
//! │  └──────────────┘                 │
//! └───────────────────────────────────┘
//!           │ Shared DB
//! ┌─────────▼─────────────────────────┐
//! │  meshbridge-api (separate)        │
//! │  wallet lookup, vote, unvote      │
//! └───────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod custody;
pub mod destination;
pub mod dispatcher;
pub mod listener;
pub mod storage;
pub mod votes;

pub use meshbridge_core::*;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `level`; `debug` forces debug output for the workspace crates.
pub fn init_logging(level: &str, format: &str, debug: bool) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("meshbridge_relayer=debug,meshbridge_api=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "meshbridge_relayer={level},meshbridge_api={level},tower_http={level}"
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()?;
    }

    Ok(())
}

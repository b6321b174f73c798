//! Axum-based API server for meshbridge.
//!
//! This crate provides:
//! - `/health` - Liveness probe
//! - `/api/wallet/lookup` - Destination wallet bound to a source address
//! - `/api/voting/vote`, `/api/voting/unvote` - Delegate votes signed by the custodial wallet
//! - `/api/voting/status` - Wallet balance and current votes
//!
//! Every POST body carries an EIP-191 `personal_sign` signature proving control of the
//! source address.

#![warn(missing_docs)]

/// API server runtime and in-process app builder.
pub mod server;

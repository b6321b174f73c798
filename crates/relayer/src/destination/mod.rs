//! Destination chain port.
//!
//! The relay only needs a handful of operations from the destination ledger: sequence
//! numbers, signed transfers and votes, and two read calls for wallet status.
//! [`HttpDestinationClient`] talks to a node's REST API. The recording `mock` module is
//! compiled for tests and behind the `test-util` feature.

pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod tx;

pub use http::HttpDestinationClient;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockDestination;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::warn;

use crate::custody::SigningSecret;

/// Destination chain failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    /// Node unreachable or answered with a server error.
    #[error("destination node unavailable: {0}")]
    NodeUnavailable(String),

    /// Node refused the transaction.
    #[error("transaction rejected: {reason}")]
    RejectedTransaction {
        /// Node-supplied reason
        reason: String,
    },

    /// Node refused the transaction because its sequence number is outdated.
    #[error("stale sequence number: {reason}")]
    StaleSequence {
        /// Node-supplied reason
        reason: String,
    },

    /// Local signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Memo attached to bridge transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMemo {
    /// `mint` or `burn`
    pub action: String,
    /// Token symbol
    pub token: String,
}

/// A value transfer to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Recipient destination address
    pub recipient: String,
    /// Amount in destination base units
    pub amount: u64,
    /// Memo
    pub memo: TransferMemo,
}

/// Direction of a delegate vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    /// Add the delegate (`+pk`)
    Vote,
    /// Remove the delegate (`-pk`)
    Unvote,
}

impl VoteDirection {
    /// Vote entry for a delegate public key.
    pub fn entry(&self, delegate_public_key: &str) -> String {
        match self {
            VoteDirection::Vote => format!("+{}", delegate_public_key),
            VoteDirection::Unvote => format!("-{}", delegate_public_key),
        }
    }
}

/// A delegate a wallet currently votes for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateVote {
    /// Delegate wallet address
    pub delegate_address: String,
    /// Delegate public key, compressed hex
    pub delegate_public_key: String,
    /// Registered delegate name
    pub name: String,
    /// Total vote weight behind the delegate, in base units
    pub weight: u64,
}

/// Destination chain operations.
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Sequence number the next transaction from `address` must carry.
    async fn next_sequence(&self, address: &str) -> Result<u64, DestinationError>;

    /// Sign and submit a transfer. Returns the transaction id.
    async fn submit_transfer(
        &self,
        transfer: &TransferRequest,
        sequence: u64,
        signer: &SigningSecret,
    ) -> Result<String, DestinationError>;

    /// Sign and submit a vote or unvote. Returns the transaction id.
    async fn submit_vote(
        &self,
        signer: &SigningSecret,
        sequence: u64,
        delegate_public_key: &str,
        direction: VoteDirection,
    ) -> Result<String, DestinationError>;

    /// Balance of `address` in base units.
    async fn balance(&self, address: &str) -> Result<u64, DestinationError>;

    /// Delegates `address` currently votes for.
    async fn delegate_votes(&self, address: &str) -> Result<Vec<DelegateVote>, DestinationError>;
}

/// Submit with a sequence number fetched just before sending.
///
/// A `StaleSequence` rejection is retried exactly once with a freshly fetched number.
pub async fn submit_with_fresh_sequence<F, Fut>(
    chain: &dyn DestinationChain,
    signer_address: &str,
    mut submit: F,
) -> Result<String, DestinationError>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<String, DestinationError>>,
{
    let sequence = chain.next_sequence(signer_address).await?;
    match submit(sequence).await {
        Err(DestinationError::StaleSequence { reason }) => {
            warn!(
                signer = signer_address,
                sequence,
                reason = %reason,
                "Stale sequence number, retrying once"
            );
            let sequence = chain.next_sequence(signer_address).await?;
            submit(sequence).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_sequence_retried_once() {
        let chain = MockDestination::default();
        let signer = SigningSecret::from_passphrase("retry").unwrap();
        let address = signer.address("hm").unwrap();
        chain.set_sequence(&address, 4);
        chain.reject_stale_once(&address);

        let transfer = TransferRequest {
            recipient: "hmrecipient".to_string(),
            amount: 10,
            memo: TransferMemo {
                action: "mint".to_string(),
                token: "HMESH".to_string(),
            },
        };
        let tx_id = submit_with_fresh_sequence(&chain, &address, |seq| {
            chain.submit_transfer(&transfer, seq, &signer)
        })
        .await
        .unwrap();

        assert!(!tx_id.is_empty());
        let submissions = chain.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].sequence, 5);
        assert_eq!(chain.sequence_fetches(&address), 2);
    }

    #[tokio::test]
    async fn test_second_stale_is_returned() {
        let chain = MockDestination::default();
        let signer = SigningSecret::from_passphrase("retry").unwrap();
        let address = signer.address("hm").unwrap();
        chain.reject_stale_always(&address);

        let err = submit_with_fresh_sequence(&chain, &address, |seq| {
            chain.submit_vote(&signer, seq, "02ab", VoteDirection::Vote)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DestinationError::StaleSequence { .. }));
        assert_eq!(chain.sequence_fetches(&address), 2);
        assert!(chain.submissions().is_empty());
    }

    #[test]
    fn test_vote_entry() {
        assert_eq!(VoteDirection::Vote.entry("02ab"), "+02ab");
        assert_eq!(VoteDirection::Unvote.entry("02ab"), "-02ab");
    }
}

//! Recording destination chain for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{DelegateVote, DestinationChain, DestinationError, TransferRequest, VoteDirection};
use crate::custody::SigningSecret;

/// What a recorded submission did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionKind {
    /// Value transfer
    Transfer(TransferRequest),
    /// Vote entry (`+pk` / `-pk`)
    Vote(String),
}

/// One accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Transaction id handed back
    pub tx_id: String,
    /// Address of the signing key
    pub signer_address: String,
    /// Sequence number used
    pub sequence: u64,
    /// Payload
    pub kind: SubmissionKind,
}

#[derive(Default)]
struct MockState {
    sequences: HashMap<String, u64>,
    sequence_fetches: HashMap<String, u32>,
    stale_once: HashSet<String>,
    stale_always: HashSet<String>,
    rejected_recipients: HashSet<String>,
    balances: HashMap<String, u64>,
    votes: HashMap<String, Vec<DelegateVote>>,
    unavailable: bool,
    submissions: Vec<Submission>,
}

/// In-memory destination chain.
///
/// Accepted transfers and votes advance the signer's sequence number. Failure modes
/// are scripted per address.
pub struct MockDestination {
    address_prefix: String,
    state: Mutex<MockState>,
}

impl Default for MockDestination {
    fn default() -> Self {
        Self::new("hm")
    }
}

impl MockDestination {
    /// Create a mock deriving signer addresses with `address_prefix`.
    pub fn new(address_prefix: impl Into<String>) -> Self {
        Self {
            address_prefix: address_prefix.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the last used sequence number of `address`.
    pub fn set_sequence(&self, address: &str, sequence: u64) {
        self.state().sequences.insert(address.to_string(), sequence);
    }

    /// Set the balance reported for `address`.
    pub fn set_balance(&self, address: &str, balance: u64) {
        self.state().balances.insert(address.to_string(), balance);
    }

    /// Set the votes reported for `address`.
    pub fn set_votes(&self, address: &str, votes: Vec<DelegateVote>) {
        self.state().votes.insert(address.to_string(), votes);
    }

    /// Reject the next submission signed by `address` as stale.
    pub fn reject_stale_once(&self, address: &str) {
        self.state().stale_once.insert(address.to_string());
    }

    /// Reject every submission signed by `address` as stale.
    pub fn reject_stale_always(&self, address: &str) {
        self.state().stale_always.insert(address.to_string());
    }

    /// Reject transfers to `recipient`.
    pub fn reject_recipient(&self, recipient: &str) {
        self.state().rejected_recipients.insert(recipient.to_string());
    }

    /// Toggle node availability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Accepted submissions, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    /// How often the sequence of `address` was fetched.
    pub fn sequence_fetches(&self, address: &str) -> u32 {
        self.state()
            .sequence_fetches
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    fn accept(
        &self,
        signer: &SigningSecret,
        sequence: u64,
        kind: SubmissionKind,
    ) -> Result<String, DestinationError> {
        let signer_address = signer
            .address(&self.address_prefix)
            .map_err(|e| DestinationError::Signing(e.to_string()))?;

        let mut state = self.state();
        if state.unavailable {
            return Err(DestinationError::NodeUnavailable("mock node down".to_string()));
        }
        if state.stale_always.contains(&signer_address) || state.stale_once.remove(&signer_address) {
            return Err(DestinationError::StaleSequence {
                reason: format!("nonce {} already used", sequence),
            });
        }
        if let SubmissionKind::Transfer(transfer) = &kind {
            if state.rejected_recipients.contains(&transfer.recipient) {
                return Err(DestinationError::RejectedTransaction {
                    reason: format!("recipient {} rejected", transfer.recipient),
                });
            }
        }

        let expected = state.sequences.get(&signer_address).copied().unwrap_or(0) + 1;
        if sequence != expected {
            return Err(DestinationError::StaleSequence {
                reason: format!("expected nonce {}, got {}", expected, sequence),
            });
        }
        state.sequences.insert(signer_address.clone(), sequence);

        let tx_id = format!("tx-{}", state.submissions.len() + 1);
        state.submissions.push(Submission {
            tx_id: tx_id.clone(),
            signer_address,
            sequence,
            kind,
        });
        Ok(tx_id)
    }
}

#[async_trait]
impl DestinationChain for MockDestination {
    async fn next_sequence(&self, address: &str) -> Result<u64, DestinationError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(DestinationError::NodeUnavailable("mock node down".to_string()));
        }
        *state.sequence_fetches.entry(address.to_string()).or_default() += 1;
        Ok(state.sequences.get(address).copied().unwrap_or(0) + 1)
    }

    async fn submit_transfer(
        &self,
        transfer: &TransferRequest,
        sequence: u64,
        signer: &SigningSecret,
    ) -> Result<String, DestinationError> {
        self.accept(signer, sequence, SubmissionKind::Transfer(transfer.clone()))
    }

    async fn submit_vote(
        &self,
        signer: &SigningSecret,
        sequence: u64,
        delegate_public_key: &str,
        direction: VoteDirection,
    ) -> Result<String, DestinationError> {
        self.accept(
            signer,
            sequence,
            SubmissionKind::Vote(direction.entry(delegate_public_key)),
        )
    }

    async fn balance(&self, address: &str) -> Result<u64, DestinationError> {
        let state = self.state();
        if state.unavailable {
            return Err(DestinationError::NodeUnavailable("mock node down".to_string()));
        }
        Ok(state.balances.get(address).copied().unwrap_or(0))
    }

    async fn delegate_votes(&self, address: &str) -> Result<Vec<DelegateVote>, DestinationError> {
        let state = self.state();
        if state.unavailable {
            return Err(DestinationError::NodeUnavailable("mock node down".to_string()));
        }
        Ok(state.votes.get(address).cloned().unwrap_or_default())
    }
}

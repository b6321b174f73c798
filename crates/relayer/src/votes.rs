//! User-triggered delegate votes signed with custodial wallets.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::custody::{CustodyError, IdentityBinder};
use crate::destination::{
    submit_with_fresh_sequence, DelegateVote, DestinationChain, DestinationError, VoteDirection,
};
use crate::storage::{IdentityBinding, Storage};

/// Vote action failures.
#[derive(Error, Debug)]
pub enum VoteError {
    /// The source address has no custodial wallet.
    #[error("no wallet bound to {0}")]
    NotFound(String),

    /// Destination chain refused or was unreachable.
    #[error(transparent)]
    Destination(#[from] DestinationError),

    /// Wallet secrets could not be unsealed.
    #[error(transparent)]
    Custody(#[from] CustodyError),

    /// Binding lookup failed.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// Destination-side view of a bound wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    /// Bound destination address
    pub destination_address: String,
    /// Balance in base units
    pub balance: u64,
    /// Delegates currently voted for
    pub current_votes: Vec<DelegateVote>,
}

/// Vote, unvote and wallet status for bound source addresses.
#[derive(Clone)]
pub struct VoteService {
    storage: Storage,
    binder: IdentityBinder,
    destination: Arc<dyn DestinationChain>,
}

impl VoteService {
    /// Create a service.
    pub fn new(
        storage: Storage,
        binder: IdentityBinder,
        destination: Arc<dyn DestinationChain>,
    ) -> Self {
        Self {
            storage,
            binder,
            destination,
        }
    }

    async fn binding(&self, source_address: &str) -> Result<IdentityBinding, VoteError> {
        self.storage
            .binding_for(source_address)
            .await
            .map_err(VoteError::Storage)?
            .ok_or_else(|| VoteError::NotFound(source_address.to_string()))
    }

    /// Vote for a delegate. Returns the destination tx id.
    pub async fn vote(
        &self,
        source_address: &str,
        delegate_public_key: &str,
    ) -> Result<String, VoteError> {
        self.cast(source_address, delegate_public_key, VoteDirection::Vote)
            .await
    }

    /// Remove a vote for a delegate. Returns the destination tx id.
    pub async fn unvote(
        &self,
        source_address: &str,
        delegate_public_key: &str,
    ) -> Result<String, VoteError> {
        self.cast(source_address, delegate_public_key, VoteDirection::Unvote)
            .await
    }

    async fn cast(
        &self,
        source_address: &str,
        delegate_public_key: &str,
        direction: VoteDirection,
    ) -> Result<String, VoteError> {
        let binding = self.binding(source_address).await?;
        let signer = self.binder.unseal(&binding)?;

        let destination = self.destination.as_ref();
        let tx_id =
            submit_with_fresh_sequence(destination, &binding.destination_address, |sequence| {
                destination.submit_vote(&signer, sequence, delegate_public_key, direction)
            })
            .await?;

        info!(
            source = %binding.source_address,
            wallet = %binding.destination_address,
            vote = %direction.entry(delegate_public_key),
            tx_id = %tx_id,
            "Submitted vote"
        );
        Ok(tx_id)
    }

    /// Destination address bound to `source_address`.
    pub async fn wallet_address(&self, source_address: &str) -> Result<String, VoteError> {
        Ok(self.binding(source_address).await?.destination_address)
    }

    /// Balance and votes of the wallet bound to `source_address`.
    pub async fn wallet_status(&self, source_address: &str) -> Result<WalletStatus, VoteError> {
        let destination_address = self.wallet_address(source_address).await?;
        let balance = self.destination.balance(&destination_address).await?;
        let current_votes = self.destination.delegate_votes(&destination_address).await?;

        Ok(WalletStatus {
            destination_address,
            balance,
            current_votes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::test_binder;
    use crate::destination::mock::SubmissionKind;
    use crate::destination::MockDestination;
    use crate::storage::tests::setup_storage;
    use crate::storage::EventRecord;
    use meshbridge_core::{EventId, EventKind};
    use tempfile::NamedTempFile;

    const BUYER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const DELEGATE: &str = "02a9e1f6c2d5a7b0e3c4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7";

    async fn setup() -> (VoteService, Arc<MockDestination>, Storage, NamedTempFile) {
        let (storage, temp_db) = setup_storage().await;
        let binder = test_binder();
        let record = EventRecord {
            event_id: EventId::from_raw("0xabc-0"),
            transaction_hash: "0xabc".to_string(),
            block_number: 1,
            log_index: 0,
            kind: EventKind::TokensBought,
            args: vec![BUYER.into(), "1".into(), "1000000000000000000".into(), "5".into()],
            user_context: None,
        };
        storage.enqueue(&record, &binder).await.unwrap();

        let destination = Arc::new(MockDestination::default());
        let service = VoteService::new(storage.clone(), binder, destination.clone());
        (service, destination, storage, temp_db)
    }

    #[tokio::test]
    async fn test_vote_signed_by_bound_wallet() {
        let (service, destination, storage, _temp_db) = setup().await;
        let binding = storage.binding_for(BUYER).await.unwrap().unwrap();

        let tx_id = service.vote(BUYER, DELEGATE).await.unwrap();
        service.unvote(BUYER, DELEGATE).await.unwrap();

        let submissions = destination.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].tx_id, tx_id);
        assert_eq!(submissions[0].signer_address, binding.destination_address);
        assert_eq!(submissions[0].kind, SubmissionKind::Vote(format!("+{DELEGATE}")));
        assert_eq!(submissions[1].kind, SubmissionKind::Vote(format!("-{DELEGATE}")));
        assert_eq!(submissions[1].sequence, 2);
    }

    #[tokio::test]
    async fn test_unknown_address_not_found() {
        let (service, destination, _storage, _temp_db) = setup().await;
        let stranger = "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359";

        assert!(matches!(
            service.vote(stranger, DELEGATE).await,
            Err(VoteError::NotFound(_))
        ));
        assert!(matches!(
            service.wallet_status(stranger).await,
            Err(VoteError::NotFound(_))
        ));
        assert!(destination.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_wallet_status() {
        let (service, destination, storage, _temp_db) = setup().await;
        let binding = storage.binding_for(BUYER).await.unwrap().unwrap();
        destination.set_balance(&binding.destination_address, 42_000);
        let delegate = DelegateVote {
            delegate_address: "hmDelegate".to_string(),
            delegate_public_key: DELEGATE.to_string(),
            name: "genesis_1".to_string(),
            weight: 9_000_000,
        };
        destination.set_votes(&binding.destination_address, vec![delegate.clone()]);

        let status = service.wallet_status(BUYER).await.unwrap();
        assert_eq!(status.destination_address, binding.destination_address);
        assert_eq!(status.balance, 42_000);
        assert_eq!(status.current_votes, vec![delegate]);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["currentVotes"][0]["delegatePublicKey"], DELEGATE);
        assert_eq!(json["currentVotes"][0]["weight"], 9_000_000);
        assert_eq!(
            service.wallet_address(&BUYER.to_lowercase()).await.unwrap(),
            binding.destination_address
        );
    }

    #[tokio::test]
    async fn test_stale_vote_retried_once() {
        let (service, destination, storage, _temp_db) = setup().await;
        let binding = storage.binding_for(BUYER).await.unwrap().unwrap();
        destination.reject_stale_once(&binding.destination_address);

        service.vote(BUYER, DELEGATE).await.unwrap();
        assert_eq!(destination.sequence_fetches(&binding.destination_address), 2);
        assert_eq!(destination.submissions().len(), 1);
    }
}

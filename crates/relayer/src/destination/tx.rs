//! Destination transaction construction and signing.
//!
//! A transaction is hashed over its canonical unsigned JSON form (fields in declaration
//! order, no signature, no id). The signature is a DER ECDSA signature over that digest
//! and the id is `sha256(unsigned || signature)`.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{DestinationError, TransferRequest, VoteDirection};
use crate::custody::SigningSecret;

/// Transaction version understood by the node.
pub const TRANSACTION_VERSION: u8 = 2;
/// Core transaction group.
pub const CORE_TYPE_GROUP: u32 = 1;
/// Transfer type tag.
pub const TYPE_TRANSFER: u16 = 0;
/// Vote type tag.
pub const TYPE_VOTE: u16 = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoteAsset {
    votes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnsignedTransaction {
    version: u8,
    type_group: u32,
    #[serde(rename = "type")]
    kind: u16,
    nonce: String,
    sender_public_key: String,
    fee: String,
    amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vendor_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    asset: Option<VoteAsset>,
}

/// Signed transaction as posted to the node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    #[serde(flatten)]
    body: UnsignedTransaction,
    /// DER signature, hex
    pub signature: String,
    /// Transaction id, hex
    pub id: String,
}

fn sign(
    body: UnsignedTransaction,
    signer: &SigningSecret,
) -> Result<SignedTransaction, DestinationError> {
    let unsigned = serde_json::to_vec(&body)
        .map_err(|e| DestinationError::Signing(format!("serialize transaction: {e}")))?;
    let digest: [u8; 32] = Sha256::digest(&unsigned).into();
    let signature = signer
        .sign_digest(&digest)
        .map_err(|e| DestinationError::Signing(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(&unsigned);
    hasher.update(signature.as_bytes());
    let id = hex::encode(hasher.finalize());

    Ok(SignedTransaction {
        body,
        signature,
        id,
    })
}

fn sender_public_key(signer: &SigningSecret) -> Result<String, DestinationError> {
    signer
        .public_key_hex()
        .map_err(|e| DestinationError::Signing(e.to_string()))
}

/// Build and sign a transfer.
pub fn build_transfer(
    transfer: &TransferRequest,
    sequence: u64,
    fee: u64,
    signer: &SigningSecret,
) -> Result<SignedTransaction, DestinationError> {
    let vendor_field = serde_json::to_string(&transfer.memo)
        .map_err(|e| DestinationError::Signing(format!("serialize memo: {e}")))?;

    let body = UnsignedTransaction {
        version: TRANSACTION_VERSION,
        type_group: CORE_TYPE_GROUP,
        kind: TYPE_TRANSFER,
        nonce: sequence.to_string(),
        sender_public_key: sender_public_key(signer)?,
        fee: fee.to_string(),
        amount: transfer.amount.to_string(),
        recipient_id: Some(transfer.recipient.clone()),
        vendor_field: Some(vendor_field),
        asset: None,
    };
    sign(body, signer)
}

/// Build and sign a vote or unvote.
pub fn build_vote(
    delegate_public_key: &str,
    direction: VoteDirection,
    sequence: u64,
    fee: u64,
    signer: &SigningSecret,
) -> Result<SignedTransaction, DestinationError> {
    let body = UnsignedTransaction {
        version: TRANSACTION_VERSION,
        type_group: CORE_TYPE_GROUP,
        kind: TYPE_VOTE,
        nonce: sequence.to_string(),
        sender_public_key: sender_public_key(signer)?,
        fee: fee.to_string(),
        amount: "0".to_string(),
        recipient_id: None,
        vendor_field: None,
        asset: Some(VoteAsset {
            votes: vec![direction.entry(delegate_public_key)],
        }),
    };
    sign(body, signer)
}

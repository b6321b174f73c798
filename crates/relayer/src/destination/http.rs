//! REST client for a destination chain node.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::tx::{build_transfer, build_vote, SignedTransaction};
use super::{DelegateVote, DestinationChain, DestinationError, TransferRequest, VoteDirection};
use crate::custody::SigningSecret;

/// `{ "data": ... }` envelope of node read endpoints.
#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletData {
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    balance: Option<String>,
    #[serde(default)]
    vote: Option<String>,
    #[serde(default)]
    attributes: Option<WalletAttributes>,
}

#[derive(Debug, Default, Deserialize)]
struct WalletAttributes {
    #[serde(default)]
    vote: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegateData {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    votes: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    data: Option<BroadcastData>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct BroadcastData {
    #[serde(default)]
    accept: Vec<String>,
    #[serde(default)]
    invalid: Vec<String>,
}

/// Destination chain client over the node's REST API.
pub struct HttpDestinationClient {
    client: reqwest::Client,
    base_url: String,
    fee: u64,
}

impl HttpDestinationClient {
    /// Create a client for the node at `base_url`.
    pub fn new(base_url: &str, fee: u64, timeout: Duration) -> Result<Self, DestinationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DestinationError::NodeUnavailable(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            fee,
        })
    }

    /// GET a `{ "data": ... }` resource. `None` on 404.
    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, DestinationError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DestinationError::NodeUnavailable(format!("GET {url}: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DestinationError::NodeUnavailable(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        let body: DataResponse<T> = response
            .json()
            .await
            .map_err(|e| DestinationError::NodeUnavailable(format!("parse {path}: {e}")))?;
        Ok(Some(body.data))
    }

    /// Fetch the wallet record. `None` if the node has never seen the address.
    async fn wallet(&self, address: &str) -> Result<Option<WalletData>, DestinationError> {
        let wallet = self.get_data(&format!("/api/wallets/{address}")).await?;
        if wallet.is_none() {
            debug!(address, "Wallet unknown to destination node");
        }
        Ok(wallet)
    }

    /// Resolve a voted public key to its delegate record.
    async fn delegate(&self, public_key: &str) -> Result<DelegateVote, DestinationError> {
        match self
            .get_data::<DelegateData>(&format!("/api/delegates/{public_key}"))
            .await?
        {
            Some(data) => delegate_vote(public_key, data),
            None => {
                warn!(public_key, "Voted delegate unknown to destination node");
                Ok(DelegateVote {
                    delegate_address: String::new(),
                    delegate_public_key: public_key.to_string(),
                    name: String::new(),
                    weight: 0,
                })
            }
        }
    }

    async fn broadcast(&self, tx: SignedTransaction) -> Result<String, DestinationError> {
        let url = format!("{}/api/transactions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "transactions": [&tx] }))
            .send()
            .await
            .map_err(|e| DestinationError::NodeUnavailable(format!("POST {url}: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DestinationError::NodeUnavailable(format!(
                "POST {url} returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DestinationError::NodeUnavailable(format!("read response: {e}")))?;
        let parsed: BroadcastResponse =
            serde_json::from_str(&body).map_err(|_| DestinationError::RejectedTransaction {
                reason: format!("unexpected response ({status}): {body}"),
            })?;

        if let Some(errors) = parsed.errors.filter(|e| !e.is_null()) {
            return Err(classify_rejection(errors.to_string()));
        }
        let data = parsed.data.unwrap_or_default();
        if data.invalid.contains(&tx.id) || !status.is_success() {
            return Err(classify_rejection(body));
        }
        if !data.accept.is_empty() && !data.accept.contains(&tx.id) {
            return Err(DestinationError::RejectedTransaction {
                reason: format!("transaction {} not accepted", tx.id),
            });
        }

        info!(tx_id = %tx.id, "Transaction accepted by destination node");
        Ok(tx.id)
    }
}

/// Map a node rejection to a typed error. Nonce complaints are stale sequences.
fn classify_rejection(reason: String) -> DestinationError {
    if reason.to_ascii_lowercase().contains("nonce") {
        DestinationError::StaleSequence { reason }
    } else {
        DestinationError::RejectedTransaction { reason }
    }
}

fn parse_amount(field: &str, value: Option<String>) -> Result<u64, DestinationError> {
    match value {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| DestinationError::NodeUnavailable(format!("malformed {field}: {raw}"))),
    }
}

fn delegate_vote(public_key: &str, data: DelegateData) -> Result<DelegateVote, DestinationError> {
    let weight = match data.votes {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            DestinationError::NodeUnavailable(format!("malformed delegate votes: {n}"))
        })?,
        Some(Value::String(raw)) => parse_amount("delegate votes", Some(raw))?,
        Some(other) => {
            return Err(DestinationError::NodeUnavailable(format!(
                "malformed delegate votes: {other}"
            )))
        }
    };

    Ok(DelegateVote {
        delegate_address: data.address.unwrap_or_default(),
        delegate_public_key: data.public_key.unwrap_or_else(|| public_key.to_string()),
        name: data.username.unwrap_or_default(),
        weight,
    })
}

#[async_trait]
impl DestinationChain for HttpDestinationClient {
    async fn next_sequence(&self, address: &str) -> Result<u64, DestinationError> {
        let nonce = match self.wallet(address).await? {
            Some(wallet) => parse_amount("nonce", wallet.nonce)?,
            None => 0,
        };
        Ok(nonce + 1)
    }

    async fn submit_transfer(
        &self,
        transfer: &TransferRequest,
        sequence: u64,
        signer: &SigningSecret,
    ) -> Result<String, DestinationError> {
        let tx = build_transfer(transfer, sequence, self.fee, signer)?;
        debug!(
            tx_id = %tx.id,
            recipient = %transfer.recipient,
            amount = transfer.amount,
            sequence,
            "Submitting transfer"
        );
        self.broadcast(tx).await
    }

    async fn submit_vote(
        &self,
        signer: &SigningSecret,
        sequence: u64,
        delegate_public_key: &str,
        direction: VoteDirection,
    ) -> Result<String, DestinationError> {
        let tx = build_vote(delegate_public_key, direction, sequence, self.fee, signer)?;
        debug!(tx_id = %tx.id, vote = %direction.entry(delegate_public_key), sequence, "Submitting vote");
        self.broadcast(tx).await
    }

    async fn balance(&self, address: &str) -> Result<u64, DestinationError> {
        match self.wallet(address).await? {
            Some(wallet) => parse_amount("balance", wallet.balance),
            None => Ok(0),
        }
    }

    async fn delegate_votes(&self, address: &str) -> Result<Vec<DelegateVote>, DestinationError> {
        let Some(wallet) = self.wallet(address).await? else {
            return Ok(Vec::new());
        };
        let vote = wallet
            .attributes
            .and_then(|a| a.vote)
            .or(wallet.vote)
            .filter(|v| !v.is_empty());

        let mut votes = Vec::new();
        if let Some(public_key) = vote {
            votes.push(self.delegate(&public_key).await?);
        }
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_rejection_is_stale() {
        let err = classify_rejection(r#"{"abc":{"message":"Invalid nonce 4, expected 5"}}"#.into());
        assert!(matches!(err, DestinationError::StaleSequence { .. }));

        let err = classify_rejection("insufficient balance".into());
        assert!(matches!(err, DestinationError::RejectedTransaction { .. }));
    }

    #[test]
    fn test_wallet_votes_from_attributes() {
        let wallet: DataResponse<WalletData> = serde_json::from_str(
            r#"{"data":{"address":"hm1","nonce":"4","balance":"2500","attributes":{"vote":"02ab"}}}"#,
        )
        .unwrap();
        assert_eq!(wallet.data.nonce.as_deref(), Some("4"));
        assert_eq!(parse_amount("balance", wallet.data.balance).unwrap(), 2500);
        assert_eq!(wallet.data.attributes.unwrap().vote.as_deref(), Some("02ab"));
    }

    #[test]
    fn test_delegate_record_from_node() {
        let delegate: DataResponse<DelegateData> = serde_json::from_str(
            r#"{"data":{"username":"genesis_7","address":"hmD1","publicKey":"02ab","votes":"123400000000"}}"#,
        )
        .unwrap();
        let vote = delegate_vote("02ab", delegate.data).unwrap();
        assert_eq!(
            vote,
            DelegateVote {
                delegate_address: "hmD1".to_string(),
                delegate_public_key: "02ab".to_string(),
                name: "genesis_7".to_string(),
                weight: 123_400_000_000,
            }
        );

        let numeric: DelegateData =
            serde_json::from_str(r#"{"username":"d","votes":5}"#).unwrap();
        let vote = delegate_vote("03cd", numeric).unwrap();
        assert_eq!(vote.weight, 5);
        assert_eq!(vote.delegate_public_key, "03cd");

        let garbage: DelegateData = serde_json::from_str(r#"{"votes":"many"}"#).unwrap();
        assert!(delegate_vote("03cd", garbage).is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client =
            HttpDestinationClient::new("http://node:4003/", 10_000_000, Duration::from_secs(30))
                .unwrap();
        assert_eq!(client.base_url, "http://node:4003");
    }
}

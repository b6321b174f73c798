use alloy_primitives::{Address, PrimitiveSignature};
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use meshbridge_relayer::config::Config;
use meshbridge_relayer::destination::{DelegateVote, DestinationError};
use meshbridge_relayer::storage::Storage;
use meshbridge_relayer::votes::{VoteError, VoteService};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Default config path when `MESHBRIDGE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "relayer.toml";

#[derive(Clone)]
struct AppState {
    votes: VoteService,
}

/// Build the router over an existing vote service.
pub fn router(votes: VoteService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/wallet/lookup", post(wallet_lookup))
        .route("/api/voting/vote", post(vote))
        .route("/api/voting/unvote", post(unvote))
        .route("/api/voting/status", post(wallet_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { votes })
}

/// Build an in-process API router from the shared relayer config.
///
/// Returns the storage handle too so the caller can close the pool on shutdown.
pub async fn build_app(config: &Config) -> anyhow::Result<(Router, Storage)> {
    let storage = Storage::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let destination = Arc::new(config.destination_client()?);
    let votes = VoteService::new(storage.clone(), config.identity_binder()?, destination);
    Ok((router(votes), storage))
}

/// Run the API server with explicit configuration.
pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    let (app, storage) = build_app(&config).await?;

    let addr = SocketAddr::new(
        config
            .api
            .host
            .parse()
            .with_context(|| format!("Invalid api host: {}", config.api.host))?,
        config.api.port,
    );
    info!("meshbridge API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    storage.close().await;
    info!("meshbridge API server shutdown complete");
    Ok(())
}

/// Run the API server with the config file named by `MESHBRIDGE_CONFIG`.
pub async fn run_from_env() -> anyhow::Result<()> {
    let path =
        std::env::var("MESHBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::from_file(&path).context("Failed to load configuration")?;
    meshbridge_relayer::init_logging(&config.logging.level, &config.logging.format, false)?;
    run_with_config(config).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: message.into(),
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, msg)
}

fn invalid_signature() -> ApiError {
    api_error(StatusCode::UNAUTHORIZED, "Invalid signature")
}

fn vote_error(err: VoteError) -> ApiError {
    match err {
        VoteError::NotFound(_) => api_error(StatusCode::NOT_FOUND, "Wallet not found"),
        VoteError::Destination(DestinationError::RejectedTransaction { reason })
        | VoteError::Destination(DestinationError::StaleSequence { reason }) => {
            warn!(reason = %reason, "Destination rejected transaction");
            api_error(
                StatusCode::BAD_GATEWAY,
                format!("Transaction rejected: {}", reason),
            )
        }
        VoteError::Destination(e) => {
            warn!("Destination chain error: {}", e);
            api_error(StatusCode::BAD_GATEWAY, "Destination chain unavailable")
        }
        e => {
            error!("Internal error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
        }
    }
}

/// Body shared by every signed endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedRequest {
    source_address: String,
    message: String,
    signature: String,
    #[serde(default)]
    delegate_public_key: Option<String>,
}

impl SignedRequest {
    /// Check the `personal_sign` signature was made by `source_address`.
    fn verify(&self) -> Result<Address, ApiError> {
        let expected = Address::from_str(self.source_address.trim())
            .map_err(|_| bad_request("Invalid sourceAddress"))?;

        let sig_bytes = hex::decode(self.signature.trim().trim_start_matches("0x"))
            .map_err(|_| invalid_signature())?;
        let signature =
            PrimitiveSignature::from_raw(&sig_bytes).map_err(|_| invalid_signature())?;
        let recovered = signature
            .recover_address_from_msg(self.message.as_bytes())
            .map_err(|_| invalid_signature())?;

        if recovered != expected {
            warn!(claimed = %expected, recovered = %recovered, "Signature does not match sourceAddress");
            return Err(invalid_signature());
        }
        Ok(expected)
    }

    fn delegate(&self) -> Result<&str, ApiError> {
        let delegate = self
            .delegate_public_key
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| bad_request("delegatePublicKey is required"))?;
        let valid = delegate.len() == 66
            && (delegate.starts_with("02") || delegate.starts_with("03"))
            && delegate.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(bad_request(
                "delegatePublicKey must be a 33-byte compressed public key in hex",
            ));
        }
        Ok(delegate)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletResponse {
    success: bool,
    destination_address: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionResponse {
    success: bool,
    transaction_id: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    destination_address: String,
    balance: u64,
    current_votes: Vec<DelegateVote>,
    message: &'static str,
}

async fn wallet_lookup(
    State(state): State<AppState>,
    Json(req): Json<SignedRequest>,
) -> ApiResult<WalletResponse> {
    let source = req.verify()?;
    let destination_address = state
        .votes
        .wallet_address(&source.to_string())
        .await
        .map_err(vote_error)?;

    Ok(Json(WalletResponse {
        success: true,
        destination_address,
        message: "Wallet retrieved successfully",
    }))
}

async fn vote(
    State(state): State<AppState>,
    Json(req): Json<SignedRequest>,
) -> ApiResult<TransactionResponse> {
    let source = req.verify()?;
    let delegate = req.delegate()?;
    let transaction_id = state
        .votes
        .vote(&source.to_string(), delegate)
        .await
        .map_err(vote_error)?;

    Ok(Json(TransactionResponse {
        success: true,
        transaction_id,
        message: "Vote submitted successfully",
    }))
}

async fn unvote(
    State(state): State<AppState>,
    Json(req): Json<SignedRequest>,
) -> ApiResult<TransactionResponse> {
    let source = req.verify()?;
    let delegate = req.delegate()?;
    let transaction_id = state
        .votes
        .unvote(&source.to_string(), delegate)
        .await
        .map_err(vote_error)?;

    Ok(Json(TransactionResponse {
        success: true,
        transaction_id,
        message: "Unvote submitted successfully",
    }))
}

async fn wallet_status(
    State(state): State<AppState>,
    Json(req): Json<SignedRequest>,
) -> ApiResult<StatusResponse> {
    let source = req.verify()?;
    let status = state
        .votes
        .wallet_status(&source.to_string())
        .await
        .map_err(vote_error)?;

    Ok(Json(StatusResponse {
        success: true,
        destination_address: status.destination_address,
        balance: status.balance,
        current_votes: status.current_votes,
        message: "Wallet status retrieved successfully",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: &str, delegate: Option<&str>) -> SignedRequest {
        SignedRequest {
            source_address: source.to_string(),
            message: "hello".to_string(),
            signature: "0x00".to_string(),
            delegate_public_key: delegate.map(str::to_string),
        }
    }

    #[test]
    fn test_malformed_signature_is_unauthorized() {
        let req = request("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed", None);
        let (status, body) = req.verify().unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.0.error, "Invalid signature");
        assert!(!body.0.success);
    }

    #[test]
    fn test_bad_source_address() {
        let (status, _) = request("not-an-address", None).verify().unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_delegate_validation() {
        let source = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let good = format!("02{}", "ab".repeat(32));
        assert_eq!(request(source, Some(&good)).delegate().unwrap(), good);

        assert!(request(source, None).delegate().is_err());
        assert!(request(source, Some("02abc")).delegate().is_err());
        assert!(request(source, Some(&format!("04{}", "ab".repeat(32))))
            .delegate()
            .is_err());
    }

    #[test]
    fn test_vote_error_mapping() {
        let (status, _) = vote_error(VoteError::NotFound("0xabc".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = vote_error(VoteError::Destination(
            DestinationError::RejectedTransaction {
                reason: "insufficient balance".into(),
            },
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.0.error.contains("insufficient balance"));

        let (status, _) = vote_error(VoteError::Destination(DestinationError::NodeUnavailable(
            "timeout".into(),
        )));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}

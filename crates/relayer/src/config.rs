//! Configuration management for the meshbridge relayer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables referenced as `${VAR}` inside the file
//! - Default values (fallbacks)

use alloy::primitives::Address;
use anyhow::{Context, Result};
use meshbridge_core::{AmountScale, DEFAULT_DESTINATION_DECIMALS, DEFAULT_SOURCE_DECIMALS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::custody::{IdentityBinder, MasterKey, SigningSecret};
use crate::destination::HttpDestinationClient;

/// Main configuration for the relayer and the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source (EVM) chain
    pub source: SourceConfig,

    /// Destination chain
    pub destination: DestinationConfig,

    /// Custody of the per-user wallets
    pub custody: CustodyConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// HTTP RPC URL used for range queries and view calls
    pub rpc_url: String,

    /// WebSocket URL for the live subscription (push channel disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Chain ID (e.g., 11155111 for Sepolia)
    pub chain_id: u64,

    /// Presale contract address
    pub presale_contract: Address,
}

/// Destination chain configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Node REST endpoint (e.g., "https://node.example.com")
    pub node_url: String,

    /// Mnemonic of the bridge wallet that signs mints
    pub bridge_mnemonic: String,

    /// Flat transaction fee in destination base units
    #[serde(default = "default_fee")]
    pub fee: u64,

    /// Token symbol written into the transaction memo
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,

    /// Prefix of destination addresses
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,

    /// Decimals of the presale token on the source chain
    #[serde(default = "default_source_decimals")]
    pub source_decimals: u8,

    /// Decimals of the token on the destination chain
    #[serde(default = "default_destination_decimals")]
    pub destination_decimals: u8,

    /// Request timeout for the node client in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("node_url", &self.node_url)
            .field("bridge_mnemonic", &"<redacted>")
            .field("fee", &self.fee)
            .field("token_symbol", &self.token_symbol)
            .field("address_prefix", &self.address_prefix)
            .field("source_decimals", &self.source_decimals)
            .field("destination_decimals", &self.destination_decimals)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Custody configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    /// 256-bit master key sealing wallet secrets (hex, optionally 0x-prefixed)
    pub master_key: String,
}

impl std::fmt::Debug for CustodyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyConfig")
            .field("master_key", &"<redacted>")
            .finish()
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://meshbridge.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Block to start from on a fresh database (0 = current head)
    #[serde(default)]
    pub start_block: u64,

    /// Pull channel interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum blocks per range query
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Delay before re-subscribing after the push channel drops
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// Size of the recently-seen event id set
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Consecutive failed pulls tolerated before the cursor is force-advanced
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Upper bound of a forced cursor advance
    #[serde(default = "default_error_skip_blocks")]
    pub error_skip_blocks: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            dedup_capacity: default_dedup_capacity(),
            max_consecutive_errors: default_max_consecutive_errors(),
            error_skip_blocks: default_error_skip_blocks(),
        }
    }
}

impl IngestConfig {
    /// Pull interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Reconnect backoff as a duration.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum queue entries per pass
    #[serde(default = "default_dispatch_batch_size")]
    pub batch_size: u32,

    /// Pass interval in seconds.
    ///
    /// **Must be > 0** - Zero will cause a panic in tokio::time::interval.
    #[serde(default = "default_dispatch_interval_secs")]
    pub interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_dispatch_batch_size(),
            interval_secs: default_dispatch_interval_secs(),
        }
    }
}

impl DispatchConfig {
    /// Pass interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_fee() -> u64 {
    10_000_000
}

fn default_token_symbol() -> String {
    "HMESH".to_string()
}

fn default_address_prefix() -> String {
    "hm".to_string()
}

fn default_source_decimals() -> u8 {
    DEFAULT_SOURCE_DECIMALS
}

fn default_destination_decimals() -> u8 {
    DEFAULT_DESTINATION_DECIMALS
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_batch_size() -> u64 {
    2000
}

fn default_reconnect_backoff_secs() -> u64 {
    10
}

fn default_dedup_capacity() -> usize {
    1000
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_error_skip_blocks() -> u64 {
    100
}

fn default_dispatch_batch_size() -> u32 {
    10
}

fn default_dispatch_interval_secs() -> u64 {
    5
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `master_key = "${MESHBRIDGE_MASTER_KEY}"`
    ///
    /// # Example
    /// ```no_run
    /// # use meshbridge_relayer::config::Config;
    /// let config = Config::from_file("relayer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)
            .with_context(|| format!("Failed to expand config file: {}", path.display()))?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.source.rpc_url.is_empty() {
            anyhow::bail!("Source rpc_url cannot be empty");
        }
        if let Some(ws_url) = &self.source.ws_url {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                anyhow::bail!("Source ws_url must start with ws:// or wss:// (got '{ws_url}')");
            }
        }
        if self.source.chain_id == 0 {
            anyhow::bail!("Source chain_id must be non-zero");
        }
        if self.source.presale_contract.is_zero() {
            anyhow::bail!("Source presale_contract must be a non-zero address");
        }

        if self.destination.node_url.is_empty() {
            anyhow::bail!("Destination node_url cannot be empty");
        }
        if self.destination.bridge_mnemonic.trim().is_empty() {
            anyhow::bail!("Destination bridge_mnemonic cannot be empty");
        }
        if self.destination.token_symbol.is_empty() {
            anyhow::bail!("Destination token_symbol cannot be empty");
        }
        if self.destination.request_timeout_secs == 0 {
            anyhow::bail!("Destination request_timeout_secs must be > 0");
        }
        self.amount_scale()?;

        let key = self.custody.master_key.trim_start_matches("0x");
        if key.len() != 64 {
            anyhow::bail!(
                "Custody master_key must be 64 hex characters (got {})",
                key.len()
            );
        }
        if !key.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Custody master_key must be a valid hex string");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.ingest.poll_interval_secs == 0 {
            anyhow::bail!("Ingest poll_interval_secs must be > 0");
        }
        if self.ingest.batch_size == 0 {
            anyhow::bail!("Ingest batch_size must be > 0");
        }
        if self.ingest.dedup_capacity == 0 {
            anyhow::bail!("Ingest dedup_capacity must be > 0");
        }
        if self.ingest.error_skip_blocks == 0 {
            anyhow::bail!("Ingest error_skip_blocks must be > 0");
        }

        if self.dispatch.batch_size == 0 {
            anyhow::bail!("Dispatch batch_size must be > 0");
        }
        if self.dispatch.interval_secs == 0 {
            anyhow::bail!(
                "Dispatch interval_secs must be > 0 (tokio interval cannot be zero)"
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Decimal conversion between the two ledgers.
    pub fn amount_scale(&self) -> Result<AmountScale> {
        AmountScale::new(
            self.destination.source_decimals,
            self.destination.destination_decimals,
        )
        .context("Invalid destination decimals")
    }

    /// Decode the custody master key.
    pub fn master_key_bytes(&self) -> Result<[u8; 32]> {
        let raw = hex::decode(self.custody.master_key.trim_start_matches("0x"))
            .context("Custody master_key must be a valid hex string")?;
        raw.try_into()
            .map_err(|_| anyhow::anyhow!("Custody master_key must decode to 32 bytes"))
    }

    /// Wallet binder sealing under the configured master key.
    pub fn identity_binder(&self) -> Result<IdentityBinder> {
        let key = MasterKey::from_bytes(self.master_key_bytes()?);
        Ok(IdentityBinder::new(key, self.destination.address_prefix.clone()))
    }

    /// Signing key of the bridge wallet.
    pub fn bridge_signer(&self) -> Result<SigningSecret> {
        SigningSecret::from_passphrase(&self.destination.bridge_mnemonic)
            .context("Invalid destination bridge_mnemonic")
    }

    /// REST client for the destination node.
    pub fn destination_client(&self) -> Result<HttpDestinationClient> {
        HttpDestinationClient::new(
            &self.destination.node_url,
            self.destination.fee,
            Duration::from_secs(self.destination.request_timeout_secs),
        )
        .context("Failed to create destination client")
    }
}

/// Expand `${VAR_NAME}` placeholders from the environment.
///
/// Lines whose first non-blank character is `#` are copied untouched, so commented-out
/// settings may reference variables that are not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());

    for (line_no, line) in input.split_inclusive('\n').enumerate() {
        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let mut rest = line;
        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').with_context(|| {
                format!("Unclosed environment variable placeholder on line {}", line_no + 1)
            })?;
            let name = &after[..end];
            if name.is_empty() {
                anyhow::bail!("Empty environment variable name on line {}", line_no + 1);
            }
            let value = std::env::var(name).with_context(|| {
                format!(
                    "Environment variable '{}' is not set (referenced on line {})",
                    name,
                    line_no + 1
                )
            })?;
            output.push_str(&value);
            rest = &after[end + 1..];
        }
        output.push_str(rest);
    }

    Ok(output)
}

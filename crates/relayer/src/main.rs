//! meshbridge relayer - presale event relay
//!
//! This binary provides:
//! - Event ingestion from the presale contract (push + pull)
//! - Custodial wallet provisioning per buyer
//! - Mint/burn dispatch to the destination chain
//!
//! Note: wallet lookup and voting are served by the separate `meshbridge-api` binary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshbridge_relayer::config::Config;
use meshbridge_relayer::dispatcher::RelayDispatcher;
use meshbridge_relayer::listener::{EventIngestor, RpcProvider, SourceChain};
use meshbridge_relayer::storage::Storage;
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "meshbridge-relayer")]
#[command(version, about = "Relay presale events to the destination chain", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relayer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay (ingestor + dispatcher)
    Run,

    /// Run a single dispatch pass and exit
    DispatchOnce,

    /// Show cursor and queue statistics
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://meshbridge.db")]
        database_url: String,
    },

    /// Show the public side of a source address binding
    Binding {
        /// Source chain address
        source_address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::InitDb { database_url } = &command {
        meshbridge_relayer::init_logging("info", "pretty", cli.debug)?;
        return init_database(database_url).await;
    }

    let config = Config::from_file(&cli.config).context("Failed to load configuration")?;
    meshbridge_relayer::init_logging(&config.logging.level, &config.logging.format, cli.debug)?;

    info!("meshbridge relayer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Run => run_relayer(config).await,
        Commands::DispatchOnce => dispatch_once(config).await,
        Commands::Status => show_status(config).await,
        Commands::Binding { source_address } => show_binding(config, &source_address).await,
        Commands::InitDb { .. } => Ok(()),
    }
}

async fn open_storage(config: &Config) -> Result<Storage> {
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

    Ok(storage)
}

fn build_dispatcher(config: &Config, storage: Storage) -> Result<RelayDispatcher> {
    let destination = Arc::new(config.destination_client()?);
    RelayDispatcher::new(
        storage,
        config.identity_binder()?,
        destination,
        config.bridge_signer()?,
        config.amount_scale()?,
        config.destination.token_symbol.clone(),
        config.dispatch.clone(),
    )
    .context("Failed to create dispatcher")
}

/// Main relay service - runs both ingestion channels and the dispatcher
async fn run_relayer(config: Config) -> Result<()> {
    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.source.chain_id);
    info!("  RPC URL: {}", config.source.rpc_url);
    info!("  Presale contract: {}", config.source.presale_contract);
    info!("  Destination node: {}", config.destination.node_url);
    info!("  Database: {}", config.database.url);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let provider = RpcProvider::new(
        &config.source.rpc_url,
        config.source.ws_url.clone(),
        config.source.presale_contract,
    )
    .context("Failed to create RPC provider")?;
    let source: Arc<dyn SourceChain> = Arc::new(provider);

    // Fresh database: start at the configured block, or at the current head
    let sync_state = storage.get_sync_state().await?;
    if !sync_state.initialized {
        let initial_block = if config.ingest.start_block > 0 {
            config.ingest.start_block - 1
        } else {
            source
                .head_block()
                .await
                .context("Failed to read source head block")?
        };
        info!(
            chain_id = config.source.chain_id,
            initial_block, "Fresh database detected, initializing cursor"
        );
        storage
            .initialize_sync_state(config.source.chain_id, initial_block)
            .await
            .context("Failed to initialize sync state")?;
    } else {
        if sync_state.chain_id != config.source.chain_id {
            anyhow::bail!(
                "Database was initialized for chain {} but config targets chain {}",
                sync_state.chain_id,
                config.source.chain_id
            );
        }
        info!(
            chain_id = sync_state.chain_id,
            last_block = sync_state.last_block_number,
            "Existing sync state found"
        );
    }

    let wake = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingestor = Arc::new(EventIngestor::new(
        source,
        storage.clone(),
        config.identity_binder()?,
        config.ingest.clone(),
        wake.clone(),
    ));
    let dispatcher = build_dispatcher(&config, storage.clone())?;
    info!(bridge = %dispatcher.bridge_address(), "Bridge wallet loaded");

    let push_handle = if config.source.ws_url.is_some() {
        Some(tokio::spawn(ingestor.clone().run_push(shutdown_rx.clone())))
    } else {
        warn!("No ws_url configured, relying on the pull channel only");
        None
    };
    let pull_handle = tokio::spawn(ingestor.clone().run_pull(shutdown_rx.clone()));
    let dispatch_handle = tokio::spawn(dispatcher.run(shutdown_rx, wake));

    info!("Relayer is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received shutdown signal, gracefully shutting down...");
    let _ = shutdown_tx.send(true);

    let mut handles = vec![("pull", pull_handle), ("dispatcher", dispatch_handle)];
    if let Some(handle) = push_handle {
        handles.push(("push", handle));
    }
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} task failed: {:#}", name, e),
            Err(e) => warn!("{} task panicked: {}", name, e),
        }
    }

    storage.close().await;
    Ok(())
}

/// Run one dispatch pass
async fn dispatch_once(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;
    let mut dispatcher = build_dispatcher(&config, storage.clone())?;

    let summary = dispatcher
        .dispatch_pass()
        .await
        .context("Dispatch pass failed")?;

    println!("\n=== Dispatch Pass ===\n");
    println!("  Fetched: {}", summary.fetched);
    println!("  Relayed: {}", summary.relayed);
    println!("  Ignored: {}", summary.ignored);
    println!("  Failed: {}", summary.failed);
    println!("  Skipped (blocked account): {}", summary.skipped);
    println!();

    storage.close().await;
    Ok(())
}

/// Show cursor and queue status
async fn show_status(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;

    let sync_state = storage.get_sync_state().await?;
    let stats = storage.stats().await?;

    println!("\n=== meshbridge Relayer Status ===\n");
    println!("Sync Progress:");
    println!("  Chain ID: {}", sync_state.chain_id);
    println!("  Initialized: {}", sync_state.initialized);
    println!("  Last Block: {}", sync_state.last_block_number);
    println!("  Last Updated: {}", format_seconds(sync_state.updated_at));

    println!("\nQueue:");
    println!("  Total Events: {}", stats.event_count);
    println!("  Unprocessed: {}", stats.unprocessed_count);
    println!("  Processed: {}", stats.processed_count);
    println!("\nBindings: {}", stats.binding_count);
    println!();

    storage.close().await;
    Ok(())
}

/// Show a binding without its sealed secrets
async fn show_binding(config: Config, source_address: &str) -> Result<()> {
    let storage = open_storage(&config).await?;

    match storage.binding_for(source_address).await? {
        Some(binding) => {
            println!("\n=== Binding ===\n");
            println!("  Source Address: {}", binding.source_address);
            println!("  Destination Address: {}", binding.destination_address);
            println!("  Public Key: {}", binding.public_key);
            println!("  Rounds: {:?}", binding.rounds);
            println!("  Created: {}", format_millis(binding.created_at));
            println!("  Last Updated: {}", format_millis(binding.last_updated));

            let events = storage.events_for_user(source_address, 10).await?;
            if !events.is_empty() {
                println!("\n  Recent events:");
                for event in events {
                    println!(
                        "    {} {} block={} processed={} tx={}",
                        event.event_id,
                        event.event_type,
                        event.block_number,
                        event.processed,
                        event.destination_tx_id.as_deref().unwrap_or("-")
                    );
                }
            }
            println!();
        }
        None => println!("\nNo binding for {}\n", source_address),
    }

    storage.close().await;
    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, 5, 1)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Events: {}", stats.event_count);
    info!("  Bindings: {}", stats.binding_count);
    info!("  Last block: {}", stats.last_block_number);

    storage.close().await;
    Ok(())
}

fn format_seconds(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

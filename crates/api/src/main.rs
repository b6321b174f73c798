//! meshbridge API - wallet lookup and delegate voting over HTTP
//!
//! Reads the relayer's TOML config (path in `MESHBRIDGE_CONFIG`, default `relayer.toml`)
//! and shares its database.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meshbridge_api::server::run_from_env().await
}

//! Identity binding lookups.

use anyhow::{Context, Result};
use meshbridge_core::normalize_address;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_json_column, IdentityBinding, Storage};

/// Lowercase form used as the binding key; falls back to a plain lowercase trim for
/// input that is not a well-formed address.
pub(crate) fn normalize_lookup(source_address: &str) -> String {
    normalize_address(source_address).unwrap_or_else(|_| source_address.trim().to_lowercase())
}

impl Storage {
    /// Binding for a source address.
    pub async fn binding_for(&self, source_address: &str) -> Result<Option<IdentityBinding>> {
        let address = normalize_lookup(source_address);

        let row = sqlx::query(
            r#"
            SELECT source_address, destination_address, public_key,
                   encrypted_mnemonic, encrypted_private_key,
                   rounds, purchase_details, created_at, last_updated
            FROM identity_bindings
            WHERE source_address = ?
            "#,
        )
        .bind(&address)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch binding for {}", address))?;

        Ok(row.as_ref().map(row_to_binding))
    }

    /// Binding owning a destination address.
    pub async fn binding_for_destination(
        &self,
        destination_address: &str,
    ) -> Result<Option<IdentityBinding>> {
        let row = sqlx::query(
            r#"
            SELECT source_address, destination_address, public_key,
                   encrypted_mnemonic, encrypted_private_key,
                   rounds, purchase_details, created_at, last_updated
            FROM identity_bindings
            WHERE destination_address = ?
            "#,
        )
        .bind(destination_address.trim())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch binding for {}", destination_address))?;

        Ok(row.as_ref().map(row_to_binding))
    }
}

fn row_to_binding(row: &SqliteRow) -> IdentityBinding {
    let source_address: String = row.get("source_address");
    let rounds_raw: String = row.get("rounds");
    let details_raw: String = row.get("purchase_details");

    IdentityBinding {
        destination_address: row.get("destination_address"),
        public_key: row.get("public_key"),
        encrypted_mnemonic: row.get("encrypted_mnemonic"),
        encrypted_private_key: row.get("encrypted_private_key"),
        rounds: decode_json_column(Some(&rounds_raw), "rounds", &source_address),
        purchase_details: decode_json_column(Some(&details_raw), "purchase_details", &source_address),
        created_at: row.get("created_at"),
        last_updated: row.get("last_updated"),
        source_address,
    }
}

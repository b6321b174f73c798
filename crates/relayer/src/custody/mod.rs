//! Custodial wallet provisioning.
//!
//! [`IdentityBinder`] creates one destination wallet per source address and seals its
//! secrets under the master key. Plaintext key material only exists inside a
//! [`SigningSecret`] for the duration of a signing operation.

pub mod cipher;
pub mod wallet;

pub use cipher::MasterKey;
pub use wallet::{address_from_public_key, SigningSecret};

use thiserror::Error;

use crate::storage::IdentityBinding;

/// Custody failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    /// OS entropy unavailable.
    #[error("entropy source failed: {0}")]
    Entropy(String),

    /// Mnemonic generation failed.
    #[error("mnemonic generation failed: {0}")]
    Mnemonic(String),

    /// Derived bytes are not a valid secp256k1 scalar.
    #[error("invalid private key")]
    InvalidKey,

    /// Encryption failed.
    #[error("failed to seal secret")]
    Seal,

    /// Decryption failed (wrong master key or tampered ciphertext).
    #[error("failed to open sealed secret")]
    Open,

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Sealed material of a freshly issued wallet, ready to persist.
#[derive(Clone)]
pub struct IssuedWallet {
    /// Destination address.
    pub address: String,
    /// Compressed public key, hex.
    pub public_key: String,
    /// Sealed mnemonic.
    pub encrypted_mnemonic: Vec<u8>,
    /// Sealed private key.
    pub encrypted_private_key: Vec<u8>,
}

impl std::fmt::Debug for IssuedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedWallet")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// Issues and unseals custodial wallets.
#[derive(Clone, Debug)]
pub struct IdentityBinder {
    master_key: MasterKey,
    address_prefix: String,
}

impl IdentityBinder {
    /// Create a binder sealing under `master_key`.
    pub fn new(master_key: MasterKey, address_prefix: impl Into<String>) -> Self {
        Self {
            master_key,
            address_prefix: address_prefix.into(),
        }
    }

    /// Destination address prefix.
    pub fn address_prefix(&self) -> &str {
        &self.address_prefix
    }

    /// Generate a new wallet and seal its secrets.
    pub fn issue(&self) -> Result<IssuedWallet, CustodyError> {
        let mnemonic = wallet::generate_mnemonic()?;
        let secret = SigningSecret::from_passphrase(&mnemonic)?;

        Ok(IssuedWallet {
            address: secret.address(&self.address_prefix)?,
            public_key: secret.public_key_hex()?,
            encrypted_mnemonic: self.master_key.seal(mnemonic.as_bytes())?,
            encrypted_private_key: self.master_key.seal(secret.expose())?,
        })
    }

    /// Unseal the signing key of a stored binding.
    pub fn unseal(&self, binding: &IdentityBinding) -> Result<SigningSecret, CustodyError> {
        let key = self.master_key.open(&binding.encrypted_private_key)?;
        SigningSecret::from_bytes(&key)
    }
}

#[cfg(test)]
pub(crate) fn test_binder() -> IdentityBinder {
    IdentityBinder::new(MasterKey::from_bytes([0x42; 32]), "hm")
}

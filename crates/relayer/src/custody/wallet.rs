//! Destination-chain wallet keys.
//!
//! The destination chain derives keys from a passphrase: the secp256k1 private key is
//! `sha256(passphrase)`, and for custodial wallets the passphrase is a 24-word BIP-39
//! mnemonic. Addresses are `prefix || hex(sha256(compressed_pubkey)[..20])`.

use bip39::Mnemonic;
use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CustodyError;

/// Entropy for a 24-word mnemonic.
const MNEMONIC_ENTROPY_BYTES: usize = 32;

/// Generate a fresh 24-word mnemonic from OS entropy.
pub(crate) fn generate_mnemonic() -> Result<Zeroizing<String>, CustodyError> {
    let mut entropy = Zeroizing::new([0u8; MNEMONIC_ENTROPY_BYTES]);
    rand::rngs::OsRng
        .try_fill_bytes(&mut entropy[..])
        .map_err(|e| CustodyError::Entropy(e.to_string()))?;

    let mnemonic = Mnemonic::from_entropy(&entropy[..])
        .map_err(|e| CustodyError::Mnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Unsealed private key of a destination-chain account.
///
/// Zeroized on drop. `Debug` never prints key material and there is no serializer.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SigningSecret {
    key: [u8; 32],
}

impl SigningSecret {
    /// Derive from a destination-chain passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CustodyError> {
        let digest = Sha256::digest(passphrase.trim().as_bytes());
        Self::from_bytes(digest.as_slice())
    }

    /// Wrap raw private key bytes, checking they form a valid scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CustodyError> {
        if bytes.len() != 32 {
            return Err(CustodyError::InvalidKey);
        }
        SigningKey::from_slice(bytes).map_err(|_| CustodyError::InvalidKey)?;
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    pub(crate) fn expose(&self) -> &[u8; 32] {
        &self.key
    }

    fn signing_key(&self) -> Result<SigningKey, CustodyError> {
        SigningKey::from_slice(&self.key).map_err(|_| CustodyError::InvalidKey)
    }

    /// Compressed SEC1 public key, hex encoded.
    pub fn public_key_hex(&self) -> Result<String, CustodyError> {
        let key = self.signing_key()?;
        let point = key.verifying_key().to_encoded_point(true);
        Ok(hex::encode(point.as_bytes()))
    }

    /// Destination address for this key.
    pub fn address(&self, prefix: &str) -> Result<String, CustodyError> {
        let public_key = hex::decode(self.public_key_hex()?).map_err(|_| CustodyError::InvalidKey)?;
        Ok(address_from_public_key(prefix, &public_key))
    }

    /// Sign a 32-byte digest, returning the DER signature as hex.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<String, CustodyError> {
        let signature: Signature = self
            .signing_key()?
            .sign_prehash(digest)
            .map_err(|e| CustodyError::Signing(e.to_string()))?;
        Ok(hex::encode(signature.to_der().as_bytes()))
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(***)")
    }
}

/// Destination address for a compressed public key.
pub fn address_from_public_key(prefix: &str, public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("{}{}", prefix, hex::encode(&digest[..20]))
}

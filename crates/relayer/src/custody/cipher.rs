//! Sealing of wallet secrets at rest.
//!
//! XChaCha20-Poly1305 with a fresh random 192-bit nonce per secret. The sealed form is
//! `nonce || ciphertext`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CustodyError;

const NONCE_LEN: usize = 24;

/// Process-wide 256-bit key used to seal every custodial secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CustodyError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CustodyError::Seal)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a value produced by [`MasterKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
        if sealed.len() <= NONCE_LEN {
            return Err(CustodyError::Open);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        self.cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CustodyError::Open)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let sealed = key.seal(b"legal winner thank year").unwrap();

        assert_eq!(sealed.len(), NONCE_LEN + 23 + 16);
        assert!(!sealed
            .windows(b"winner".len())
            .any(|w| w == b"winner"));
        assert_eq!(key.open(&sealed).unwrap().as_slice(), b"legal winner thank year");
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let a = key.seal(b"same").unwrap();
        let b = key.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_or_tamper_fails() {
        let key = MasterKey::from_bytes([7u8; 32]);
        let other = MasterKey::from_bytes([8u8; 32]);
        let mut sealed = key.seal(b"secret").unwrap();

        assert!(matches!(other.open(&sealed), Err(CustodyError::Open)));

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(key.open(&sealed), Err(CustodyError::Open)));
        assert!(matches!(key.open(&[0u8; 10]), Err(CustodyError::Open)));
    }

    #[test]
    fn test_debug_redacted() {
        let key = MasterKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{key:?}"), "MasterKey(***)");
    }
}

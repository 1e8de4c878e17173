//! Encryption at rest.
//!
//! A store opened with a [`StoreKey`] encrypts every object row with
//! ChaCha20-Poly1305 and stores index keys as keyed Blake3 hashes, so
//! neither property values nor lookup keys appear in plaintext. Three
//! independent subkeys are derived from the 64-byte store key: one for
//! object data, one for index hashing, and one whose value is kept in the
//! store to detect a wrong key at open time.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::error::{Result, StoreError};

/// Required length of a store encryption key.
pub const KEY_LENGTH: usize = 64;

const NONCE_LENGTH: usize = 12;

const DATA_CONTEXT: &str = "vellum-store v1 object data";
const INDEX_CONTEXT: &str = "vellum-store v1 index keys";
const CHECK_CONTEXT: &str = "vellum-store v1 key check";

/// A 512-bit store encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreKey([u8; KEY_LENGTH]);

impl StoreKey {
    /// Build a key from bytes, which must be exactly [`KEY_LENGTH`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| StoreError::InvalidKeyLength {
                    expected: KEY_LENGTH,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreKey(..)")
    }
}

/// Subkeys derived from a [`StoreKey`].
pub(crate) struct Cipher {
    data_key: [u8; 32],
    index_key: [u8; 32],
    check: [u8; 32],
}

impl Cipher {
    pub(crate) fn new(key: &StoreKey) -> Self {
        Self {
            data_key: blake3::derive_key(DATA_CONTEXT, &key.0),
            index_key: blake3::derive_key(INDEX_CONTEXT, &key.0),
            check: blake3::derive_key(CHECK_CONTEXT, &key.0),
        }
    }

    /// Value persisted in the store to recognize this key.
    pub(crate) fn check_value(&self) -> &[u8; 32] {
        &self.check
    }

    /// Encrypt: `nonce || ciphertext`.
    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.data_key)
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StoreError::InvalidData("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt the output of [`seal`](Self::seal).
    pub(crate) fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LENGTH {
            return Err(StoreError::Decryption);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);

        let cipher = ChaCha20Poly1305::new_from_slice(&self.data_key)
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StoreError::Decryption)
    }

    /// Keyed hash of an encoded index value.
    pub(crate) fn index_key(&self, value_bytes: &[u8]) -> Vec<u8> {
        blake3::keyed_hash(&self.index_key, value_bytes)
            .as_bytes()
            .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_enforced() {
        assert!(StoreKey::from_slice(&[0u8; KEY_LENGTH]).is_ok());
        assert!(matches!(
            StoreKey::from_slice(&[0u8; 32]),
            Err(StoreError::InvalidKeyLength {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_seal_open() {
        let cipher = Cipher::new(&StoreKey::generate());
        let sealed = cipher.seal(b"object bytes").unwrap();

        assert_ne!(&sealed[NONCE_LENGTH..], b"object bytes");
        assert_eq!(cipher.open(&sealed).unwrap(), b"object bytes");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = Cipher::new(&StoreKey::generate()).seal(b"secret").unwrap();
        let other = Cipher::new(&StoreKey::generate());
        assert!(matches!(other.open(&sealed), Err(StoreError::Decryption)));
    }

    #[test]
    fn test_subkeys_are_independent() {
        let cipher = Cipher::new(&StoreKey::generate());
        assert_ne!(cipher.data_key, cipher.index_key);
        assert_ne!(&cipher.data_key, cipher.check_value());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = StoreKey::from_slice(&[7u8; KEY_LENGTH]).unwrap();
        assert_eq!(format!("{:?}", key), "StoreKey(..)");
    }
}

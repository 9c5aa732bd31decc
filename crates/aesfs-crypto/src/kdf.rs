//! Key derivation: PBKDF2-HMAC-SHA1 password → AES-256 key

use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit key derived from a password (or from the master key).
///
/// Never persisted. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from `password` and a 16-byte `salt`.
///
/// Deterministic for identical inputs. An empty password is accepted here;
/// rejecting it is a policy decision for the caller.
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> CryptoResult<DerivedKey> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSaltLength(salt.len()));
    }
    if iterations == 0 {
        return Err(CryptoError::InvalidIterations);
    }

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut key);
    Ok(DerivedKey::from_bytes(key))
}

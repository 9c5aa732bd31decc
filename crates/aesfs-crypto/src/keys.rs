//! Master key generation and the derived filename key

use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoResult;
use crate::kdf::{derive_key, DerivedKey};
use crate::{KEY_SIZE, PBKDF2_ITERATIONS, SALT_SIZE};

/// The filesystem's 256-bit master key.
///
/// Generated once when a storage root is initialized and only ever persisted
/// inside an envelope. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit master key.
pub fn generate_master_key() -> MasterKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    MasterKey::from_bytes(bytes)
}

/// Generate a random 16-byte KDF salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive the filename cipher key: PBKDF2 with the master key as the password.
pub fn derive_name_key(master: &MasterKey, name_salt: &[u8]) -> CryptoResult<DerivedKey> {
    derive_key(master.as_bytes(), name_salt, PBKDF2_ITERATIONS)
}

//! aesfs-crypto: key management and filename encryption for AesFS
//!
//! Key hierarchy:
//! ```text
//! Password
//!   └── Wrapping Key (PBKDF2-HMAC-SHA1, 2000 rounds, salt stored in the envelope)
//!         └── Master Key (256-bit random, AES-256-GCM envelope in .aesfs.json)
//!               └── Name Key (PBKDF2-HMAC-SHA1 over the master key, rand_salt)
//!                     └── Filename cipher: AES-256-ECB + PKCS#7, base64 with '/' → '_'
//! ```
//!
//! The filename cipher is deterministic and unauthenticated. Two names sharing
//! their first 16 bytes share the first 20 characters of their encoded form.
//! This is kept for compatibility with existing encrypted trees.

pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keyfile;
pub mod keys;
pub mod names;

pub use envelope::{seal, unwrap, wrap, Envelope};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, DerivedKey};
pub use keyfile::{
    init, is_key_file_name, open_or_init, KeyFile, UnlockedKeys, KEY_FILE_NAME,
    KEY_FILE_TEMP_PREFIX,
};
pub use keys::{derive_name_key, generate_master_key, generate_salt, MasterKey};
pub use names::{NameCipher, SEPARATOR_PLACEHOLDER};

/// Size of every symmetric key in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;

/// Size of the AES-GCM nonce used by the envelope
pub const NONCE_SIZE: usize = 16;

/// Size of an AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// PBKDF2 iteration count for every derivation
pub const PBKDF2_ITERATIONS: u32 = 2000;

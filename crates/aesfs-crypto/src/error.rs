use std::path::PathBuf;

use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid salt length: {0} bytes (expected 16)")]
    InvalidSaltLength(usize),

    #[error("invalid PBKDF2 iteration count: 0")]
    InvalidIterations,

    /// Wrong password and a tampered envelope are reported identically.
    #[error("cannot unlock: wrong password or corrupted key envelope")]
    Authentication,

    #[error("malformed key envelope: {0}")]
    MalformedEnvelope(String),

    #[error("ciphertext of {0} bytes does not fit the 16-bit envelope length field")]
    LengthOverflow(usize),

    #[error("encryption failed")]
    Encryption,

    #[error("name decoding failed: {0}")]
    Encoding(String),

    #[error("invalid key file {path}: {reason}")]
    KeyFile { path: PathBuf, reason: String },

    #[error("{0} is not empty and has no key file")]
    NotInitialized(PathBuf),

    #[error("key file already exists in {0}")]
    AlreadyInitialized(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! AES-ECB filename encryption
//!
//! Each path segment is padded (PKCS#7) to the AES block size, encrypted block
//! by block with no chaining, and base64-encoded. Base64 may emit `/`, which is
//! illegal inside a segment, so it is replaced by [`SEPARATOR_PLACEHOLDER`].
//!
//! ECB is deterministic per block: names that share a 16-byte prefix share an
//! encoded prefix, and nothing authenticates the ciphertext. Existing encrypted
//! trees depend on this exact scheme.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DerivedKey;
use crate::BLOCK_SIZE;

/// Stand-in for `/` in encoded names. Not part of the base64 alphabet.
pub const SEPARATOR_PLACEHOLDER: char = '_';

/// Encrypts and decrypts single path segments under a fixed key.
///
/// Immutable after construction, so one instance can be shared across threads.
#[derive(Clone)]
pub struct NameCipher {
    cipher: Aes256,
}

impl NameCipher {
    pub fn new(key: &DerivedKey) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt one path segment. Total: every segment has exactly one encoding.
    pub fn encode(&self, segment: &str) -> String {
        let mut buf = pkcs7_pad(segment.as_bytes());
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        STANDARD
            .encode(&buf)
            .replace('/', &SEPARATOR_PLACEHOLDER.to_string())
    }

    /// Reverse [`encode`](Self::encode).
    pub fn decode(&self, encoded: &str) -> CryptoResult<String> {
        let restored = encoded.replace(SEPARATOR_PLACEHOLDER, "/");
        let mut buf = STANDARD
            .decode(restored.as_bytes())
            .map_err(|e| CryptoError::Encoding(format!("invalid base64: {e}")))?;

        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::Encoding(format!(
                "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
                buf.len()
            )));
        }

        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let len = pkcs7_unpadded_len(&buf)?;
        buf.truncate(len);

        String::from_utf8(buf)
            .map_err(|e| CryptoError::Encoding(format!("decrypted name is not UTF-8: {e}")))
    }

    /// Length of the encoded form of a `plaintext_len`-byte segment.
    pub fn encoded_len(plaintext_len: usize) -> usize {
        let padded = (plaintext_len / BLOCK_SIZE + 1) * BLOCK_SIZE;
        padded.div_ceil(3) * 4
    }
}

impl std::fmt::Debug for NameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut buf = Vec::with_capacity(data.len() + pad);
    buf.extend_from_slice(data);
    // pad is in 1..=16, always fits a byte
    buf.resize(data.len() + pad, pad as u8);
    buf
}

fn pkcs7_unpadded_len(buf: &[u8]) -> CryptoResult<usize> {
    let pad = match buf.last() {
        Some(&b) => b as usize,
        None => return Err(CryptoError::Encoding("empty plaintext".into())),
    };
    if pad == 0 || pad > BLOCK_SIZE || pad > buf.len() {
        return Err(CryptoError::Encoding("invalid padding".into()));
    }
    if buf[buf.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(CryptoError::Encoding("invalid padding".into()));
    }
    Ok(buf.len() - pad)
}

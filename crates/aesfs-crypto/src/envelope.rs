//! Master key envelope: AES-256-GCM under a password-derived key
//!
//! Binary layout (all offsets fixed):
//! ```text
//! [16-byte salt][16-byte nonce][16-byte tag][2-byte BE ciphertext length][ciphertext]
//! ```
//! The salt is the one used to derive the wrapping key, so a password alone is
//! enough to open the envelope. The GCM nonce is 16 bytes, not the usual 12.

use aes::Aes256;
use aes_gcm::{
    aead::{consts::U16, generic_array::GenericArray, AeadInPlace, KeyInit},
    AesGcm,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key, DerivedKey};
use crate::keys::{generate_salt, MasterKey};
use crate::{KEY_SIZE, NONCE_SIZE, PBKDF2_ITERATIONS, SALT_SIZE, TAG_SIZE};

/// AES-256-GCM with a 128-bit nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Size of the ciphertext length field
pub const LENGTH_FIELD_SIZE: usize = 2;

/// Bytes preceding the ciphertext
pub const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE + TAG_SIZE + LENGTH_FIELD_SIZE;

/// Parsed envelope fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Serialize to the fixed layout. Fails if the ciphertext overflows the
    /// 16-bit length field.
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        let len = u16::try_from(self.ciphertext.len())
            .map_err(|_| CryptoError::LengthOverflow(self.ciphertext.len()))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Parse the fixed layout. Does not verify anything cryptographic.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "{} bytes is shorter than the {HEADER_SIZE}-byte header",
                bytes.len()
            )));
        }

        let (salt, rest) = bytes.split_at(SALT_SIZE);
        let (nonce, rest) = rest.split_at(NONCE_SIZE);
        let (tag, rest) = rest.split_at(TAG_SIZE);
        let (len, ciphertext) = rest.split_at(LENGTH_FIELD_SIZE);

        let declared = u16::from_be_bytes([len[0], len[1]]) as usize;
        if declared != ciphertext.len() {
            return Err(CryptoError::MalformedEnvelope(format!(
                "declared ciphertext length {declared} but {} bytes present",
                ciphertext.len()
            )));
        }

        Ok(Self {
            salt: to_array(salt),
            nonce: to_array(nonce),
            tag: to_array(tag),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

fn to_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Wrap the master key under `wrapping_key`, recording `salt` so the key can
/// be re-derived at unwrap time.
pub fn wrap(
    master: &MasterKey,
    wrapping_key: &DerivedKey,
    salt: &[u8; SALT_SIZE],
) -> CryptoResult<Vec<u8>> {
    wrap_bytes(master.as_bytes(), wrapping_key, salt)
}

/// Derive a wrapping key from `password` under a fresh salt and wrap the master key.
pub fn seal(master: &MasterKey, password: &[u8]) -> CryptoResult<Vec<u8>> {
    let salt = generate_salt();
    let wrapping_key = derive_key(password, &salt, PBKDF2_ITERATIONS)?;
    wrap(master, &wrapping_key, &salt)
}

fn wrap_bytes(
    plaintext: &[u8],
    wrapping_key: &DerivedKey,
    salt: &[u8; SALT_SIZE],
) -> CryptoResult<Vec<u8>> {
    if plaintext.len() > u16::MAX as usize {
        return Err(CryptoError::LengthOverflow(plaintext.len()));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm16::new(wrapping_key.as_bytes().into());
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut buf)
        .map_err(|_| CryptoError::Encryption)?;

    let envelope = Envelope {
        salt: *salt,
        nonce,
        tag: to_array(tag.as_slice()),
        ciphertext: buf,
    };
    envelope.to_bytes()
}

/// Open an envelope with `password`.
///
/// A wrong password and a modified tag or ciphertext both yield
/// [`CryptoError::Authentication`]; callers cannot tell them apart.
pub fn unwrap(envelope: &[u8], password: &[u8]) -> CryptoResult<MasterKey> {
    let env = Envelope::from_bytes(envelope)?;
    let wrapping_key = derive_key(password, &env.salt, PBKDF2_ITERATIONS)?;

    let cipher = Aes256Gcm16::new(wrapping_key.as_bytes().into());
    let mut buf = env.ciphertext;
    if cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(&env.nonce),
            b"",
            &mut buf,
            GenericArray::from_slice(&env.tag),
        )
        .is_err()
    {
        buf.zeroize();
        return Err(CryptoError::Authentication);
    }

    if buf.len() != KEY_SIZE {
        let len = buf.len();
        buf.zeroize();
        return Err(CryptoError::MalformedEnvelope(format!(
            "unwrapped key is {len} bytes (expected {KEY_SIZE})"
        )));
    }

    let key = MasterKey::from_bytes(to_array(&buf));
    buf.zeroize();
    tracing::debug!("master key envelope opened");
    Ok(key)
}

//! The `.aesfs.json` key file at the top of a storage root
//!
//! ```json
//! {
//!   "masterkey": "<base64 envelope>",
//!   "rand_salt": "<base64 16-byte salt for the name key>"
//! }
//! ```
//!
//! Written once by [`KeyFile::create`], rewritten only by [`KeyFile::rewrap`].
//! Saves go through a temp file in the same directory and a rename, so a
//! crash never leaves a half-written key file behind. The temp file carries
//! the [`KEY_FILE_TEMP_PREFIX`] prefix; a leftover one is ignored like the
//! key file itself.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::envelope;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DerivedKey;
use crate::keys::{derive_name_key, generate_master_key, generate_salt, MasterKey};
use crate::names::NameCipher;
use crate::SALT_SIZE;

/// File name of the key file inside the storage root
pub const KEY_FILE_NAME: &str = ".aesfs.json";

/// Prefix of the temp file a save writes before renaming it into place
pub const KEY_FILE_TEMP_PREFIX: &str = ".aesfs.json.";

/// The key file or a save's temp file. Encoded names never contain `.`, so
/// neither can collide with a stored entry.
pub fn is_key_file_name(name: &OsStr) -> bool {
    name == KEY_FILE_NAME
        || name
            .to_str()
            .is_some_and(|n| n.starts_with(KEY_FILE_TEMP_PREFIX))
}

/// On-disk form of the key file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    /// Base64 of the master key envelope
    pub masterkey: String,
    /// Base64 of the 16-byte name-key salt
    pub rand_salt: String,
}

/// Keys recovered from a key file with the right password.
#[derive(Debug)]
pub struct UnlockedKeys {
    pub master: MasterKey,
    pub name_key: DerivedKey,
}

impl UnlockedKeys {
    /// Filename cipher bound to the name key.
    pub fn name_cipher(&self) -> NameCipher {
        NameCipher::new(&self.name_key)
    }
}

impl KeyFile {
    /// Path of the key file for `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(KEY_FILE_NAME)
    }

    pub fn exists(root: &Path) -> bool {
        Self::path(root).is_file()
    }

    /// Generate a fresh master key and name salt, sealed under `password`.
    /// Nothing is written to disk.
    pub fn create(password: &SecretString) -> CryptoResult<Self> {
        let master = generate_master_key();
        let rand_salt = generate_salt();
        let sealed = envelope::seal(&master, password.expose_secret().as_bytes())?;

        Ok(Self {
            masterkey: STANDARD.encode(sealed),
            rand_salt: STANDARD.encode(rand_salt),
        })
    }

    /// Read and parse the key file in `root`. Both fields must decode.
    pub fn load(root: &Path) -> CryptoResult<Self> {
        let path = Self::path(root);
        let raw = std::fs::read_to_string(&path)?;
        let key_file: Self = match serde_json::from_str(&raw) {
            Ok(kf) => kf,
            Err(e) => {
                return Err(CryptoError::KeyFile {
                    path,
                    reason: e.to_string(),
                })
            }
        };
        if let Err(reason) = key_file.decode_salt().and(key_file.decode_envelope()) {
            return Err(CryptoError::KeyFile { path, reason });
        }
        Ok(key_file)
    }

    /// Atomically write the key file into `root` with owner-only permissions.
    pub fn save(&self, root: &Path) -> CryptoResult<()> {
        let path = Self::path(root);
        let json = serde_json::to_string_pretty(self).map_err(|e| CryptoError::KeyFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // created 0600 on unix
        let mut tmp = tempfile::Builder::new()
            .prefix(KEY_FILE_TEMP_PREFIX)
            .tempfile_in(root)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| CryptoError::Io(e.error))?;

        tracing::debug!(path = %path.display(), "key file written");
        Ok(())
    }

    /// Decoded name-key salt.
    pub fn name_salt(&self) -> CryptoResult<[u8; SALT_SIZE]> {
        self.decode_salt().map_err(in_memory)
    }

    fn decode_salt(&self) -> Result<[u8; SALT_SIZE], String> {
        let raw = STANDARD
            .decode(&self.rand_salt)
            .map_err(|e| format!("rand_salt is not base64: {e}"))?;
        <[u8; SALT_SIZE]>::try_from(raw.as_slice())
            .map_err(|_| format!("rand_salt is {} bytes (expected {SALT_SIZE})", raw.len()))
    }

    fn decode_envelope(&self) -> Result<Vec<u8>, String> {
        STANDARD
            .decode(&self.masterkey)
            .map_err(|e| format!("masterkey is not base64: {e}"))
    }

    /// Open the envelope with `password` and derive the name key.
    pub fn unlock(&self, password: &SecretString) -> CryptoResult<UnlockedKeys> {
        let sealed = self.decode_envelope().map_err(in_memory)?;
        let salt = self.name_salt()?;
        let master = envelope::unwrap(&sealed, password.expose_secret().as_bytes())?;
        let name_key = derive_name_key(&master, &salt)?;
        Ok(UnlockedKeys { master, name_key })
    }

    /// Re-seal the master key under `new` after verifying `old`.
    ///
    /// The master key and name salt are unchanged, so every encoded name in
    /// the storage tree stays valid.
    pub fn rewrap(&self, old: &SecretString, new: &SecretString) -> CryptoResult<Self> {
        let keys = self.unlock(old)?;
        let sealed = envelope::seal(&keys.master, new.expose_secret().as_bytes())?;
        Ok(Self {
            masterkey: STANDARD.encode(sealed),
            rand_salt: self.rand_salt.clone(),
        })
    }
}

/// Field errors on a key file that was never loaded from a root.
fn in_memory(reason: String) -> CryptoError {
    CryptoError::KeyFile {
        path: PathBuf::from(KEY_FILE_NAME),
        reason,
    }
}

/// True when `root` holds nothing but leftovers of an interrupted save.
fn is_uninitialized_root(root: &Path) -> CryptoResult<bool> {
    for entry in std::fs::read_dir(root)? {
        if !is_key_file_name(&entry?.file_name()) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Unlock the storage root, initializing it first if it is empty.
///
/// - key file present: unlock it with `password`
/// - root empty: create, save and unlock a new key file
/// - otherwise: [`CryptoError::NotInitialized`]
pub fn open_or_init(root: &Path, password: &SecretString) -> CryptoResult<UnlockedKeys> {
    if KeyFile::exists(root) {
        let keys = KeyFile::load(root)?.unlock(password)?;
        tracing::info!(root = %root.display(), "storage root unlocked");
        return Ok(keys);
    }

    if !is_uninitialized_root(root)? {
        return Err(CryptoError::NotInitialized(root.to_path_buf()));
    }

    let key_file = KeyFile::create(password)?;
    key_file.save(root)?;
    tracing::info!(root = %root.display(), "initialized new storage root");
    key_file.unlock(password)
}

/// Write a fresh key file into an empty `root`. Fails if one already exists.
pub fn init(root: &Path, password: &SecretString) -> CryptoResult<KeyFile> {
    if KeyFile::exists(root) {
        return Err(CryptoError::AlreadyInitialized(root.to_path_buf()));
    }
    if !is_uninitialized_root(root)? {
        return Err(CryptoError::NotInitialized(root.to_path_buf()));
    }
    let key_file = KeyFile::create(password)?;
    key_file.save(root)?;
    Ok(key_file)
}

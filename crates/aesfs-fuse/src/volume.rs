//! Mount-time setup: unlock the storage root and build the translator.

use std::path::Path;

use aesfs_core::{AesfsError, AesfsResult};
use aesfs_crypto::{open_or_init, CryptoError, KeyFile};
use secrecy::SecretString;
use tracing::info;

use crate::translate::PathTranslator;

/// Unlock `root` with `password`, initializing it if empty.
///
/// Runs once before any filesystem call is served. A wrong password fails
/// here, never later.
pub fn unlock(root: &Path, password: &SecretString) -> AesfsResult<PathTranslator> {
    let meta = std::fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(AesfsError::Io(std::io::Error::from_raw_os_error(
            libc::ENOTDIR,
        )));
    }
    let root = root.canonicalize()?;

    let keys = open_or_init(&root, password).map_err(key_error)?;
    info!(root = %root.display(), "volume unlocked");
    Ok(PathTranslator::new(root, keys.name_cipher()))
}

/// Unlock an already initialized `root`. Never writes a key file.
pub fn open(root: &Path, password: &SecretString) -> AesfsResult<PathTranslator> {
    let root = root.canonicalize()?;
    if !KeyFile::exists(&root) {
        return Err(key_error(CryptoError::NotInitialized(root)));
    }
    let keys = KeyFile::load(&root)
        .and_then(|kf| kf.unlock(password))
        .map_err(key_error)?;
    Ok(PathTranslator::new(root, keys.name_cipher()))
}

fn key_error(e: CryptoError) -> AesfsError {
    match e {
        CryptoError::Io(io) => AesfsError::Io(io),
        other => AesfsError::Key(other.to_string()),
    }
}

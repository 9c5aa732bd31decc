//! Virtual path ↔ storage path translation
//!
//! A virtual path `/a/b.txt` seen through the mountpoint maps to
//! `<root>/<enc("a")>/<enc("b.txt")>` on disk, one encoded segment per
//! virtual segment. The root itself maps to `<root>` and never touches the
//! cipher.

use std::ffi::{OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use aesfs_crypto::{is_key_file_name, CryptoError, NameCipher};
use thiserror::Error;

/// Longest single on-disk name accepted by common filesystems
pub const NAME_MAX: usize = 255;

/// Longest storage path passed to the OS, including the trailing NUL
pub const PATH_MAX: usize = 4096;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("encoded name is {0} bytes (limit {NAME_MAX})")]
    NameTooLong(usize),

    #[error("storage path is {0} bytes (limit {PATH_MAX})")]
    PathTooLong(usize),

    #[error("path segment is not valid UTF-8: {0:?}")]
    NotUtf8(OsString),

    #[error(transparent)]
    Codec(#[from] CryptoError),
}

impl TranslateError {
    /// errno reported to the filesystem client.
    pub fn errno(&self) -> i32 {
        match self {
            TranslateError::NameTooLong(_) | TranslateError::PathTooLong(_) => libc::ENAMETOOLONG,
            TranslateError::NotUtf8(_) => libc::EINVAL,
            TranslateError::Codec(_) => libc::EIO,
        }
    }
}

impl From<TranslateError> for io::Error {
    fn from(e: TranslateError) -> Self {
        if let TranslateError::Codec(_) = e {
            tracing::warn!("undecodable entry in storage tree: {e}");
        } else {
            tracing::debug!("path rejected: {e}");
        }
        io::Error::from_raw_os_error(e.errno())
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;

/// Maps virtual paths onto the storage root through a [`NameCipher`].
#[derive(Debug, Clone)]
pub struct PathTranslator {
    root: PathBuf,
    cipher: NameCipher,
}

impl PathTranslator {
    pub fn new(root: PathBuf, cipher: NameCipher) -> Self {
        Self { root, cipher }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage path for a virtual path. Empty segments are skipped, so `""`,
    /// `"/"` and `"//"` all map to the root.
    pub fn to_storage_path(&self, virtual_path: &OsStr) -> TranslateResult<PathBuf> {
        let mut out = self.root.clone();
        for segment in virtual_path
            .as_bytes()
            .split(|&b| b == b'/')
            .filter(|s| !s.is_empty())
        {
            out.push(self.encode_segment(OsStr::from_bytes(segment))?);
        }
        check_path_len(out)
    }

    /// Storage path for `name` inside the virtual directory `parent`.
    pub fn join(&self, parent: &OsStr, name: &OsStr) -> TranslateResult<PathBuf> {
        let mut out = self.to_storage_path(parent)?;
        out.push(self.encode_segment(name)?);
        check_path_len(out)
    }

    /// Encode a single segment, enforcing [`NAME_MAX`].
    pub fn encode_segment(&self, segment: &OsStr) -> TranslateResult<String> {
        let plain = segment
            .to_str()
            .ok_or_else(|| TranslateError::NotUtf8(segment.to_os_string()))?;
        let encoded = self.cipher.encode(plain);
        if encoded.len() > NAME_MAX {
            return Err(TranslateError::NameTooLong(encoded.len()));
        }
        Ok(encoded)
    }

    /// Decode one raw on-disk entry name. `None` for control entries that
    /// never appear in a listing.
    pub fn decode_entry(&self, raw: &OsStr) -> TranslateResult<Option<String>> {
        if is_control_entry(raw) {
            return Ok(None);
        }
        let encoded = raw.to_str().ok_or_else(|| {
            CryptoError::Encoding(format!("entry name is not UTF-8: {raw:?}"))
        })?;
        Ok(Some(self.cipher.decode(encoded)?))
    }

    /// Decode a raw listing in order. The first undecodable entry fails the
    /// whole listing.
    pub fn translate_listing<I, S>(&self, raw: I) -> TranslateResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut names = Vec::new();
        for entry in raw {
            if let Some(name) = self.decode_entry(entry.as_ref())? {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Longest plaintext segment (in bytes) whose encoding fits in [`NAME_MAX`].
    pub fn max_plaintext_name_len() -> usize {
        (0..=NAME_MAX)
            .rev()
            .find(|&len| NameCipher::encoded_len(len) <= NAME_MAX)
            .unwrap_or(0)
    }
}

/// `.`, `..`, the key file and a key file save in progress.
pub fn is_control_entry(name: &OsStr) -> bool {
    name == "." || name == ".." || is_key_file_name(name)
}

fn check_path_len(path: PathBuf) -> TranslateResult<PathBuf> {
    let len = path.as_os_str().len();
    // room for the NUL
    if len >= PATH_MAX {
        return Err(TranslateError::PathTooLong(len));
    }
    Ok(path)
}

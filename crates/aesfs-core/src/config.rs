use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AesfsError, AesfsResult};

/// Top-level settings (loaded from aesfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AesfsConfig {
    pub mount: MountSettings,
    pub log: LogSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSettings {
    /// Filesystem name reported to the kernel (default: aesfs)
    pub fs_name: String,
    /// TTL for kernel attribute/entry caching in seconds (default: 1)
    pub attr_ttl_secs: u64,
    /// Maximum write size negotiated at init, in KiB (default: 128)
    pub max_write_kib: u32,
    /// Let other users access the mount (needs user_allow_other in fuse.conf)
    pub allow_other: bool,
    /// Mount read-only
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Accept an empty password at init/passwd time (default: false)
    pub allow_empty_password: bool,
    /// Warn if the settings file is world-readable (default: true)
    pub config_file_mode_check: bool,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            fs_name: "aesfs".into(),
            attr_ttl_secs: 1,
            max_write_kib: 128,
            allow_other: false,
            read_only: false,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            allow_empty_password: false,
            config_file_mode_check: true,
        }
    }
}

impl AesfsConfig {
    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> AesfsResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AesfsError::Config(format!("parsing {}: {e}", path.display())))?;

        if config.security.config_file_mode_check {
            warn_if_world_readable(path);
        }
        Ok(config)
    }

    /// Render the settings as TOML (used by `aesfs config show`).
    pub fn to_toml(&self) -> AesfsResult<String> {
        toml::to_string_pretty(self).map_err(|e| AesfsError::Config(format!("serializing: {e}")))
    }
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        if meta.permissions().mode() & 0o004 != 0 {
            tracing::warn!(path = %path.display(), "settings file is world-readable");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

//! aesfs: encrypted-filename passthrough filesystem CLI
//!
//! Commands:
//!   init <encrypted>                 - create the key file in an empty directory
//!   mount <encrypted> <decrypted>    - serve the decrypted view (requires FUSE)
//!   unmount <decrypted>              - stop a mount (requires FUSE)
//!   passwd <encrypted>               - re-wrap the master key under a new password
//!   ls <encrypted> [<dir>]           - list a directory without mounting
//!   config show                      - display current configuration
//!
//! Passwords are prompted on the terminal unless AESFS_PASSWORD (and, for
//! `passwd`, AESFS_NEW_PASSWORD) is set.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use aesfs_core::AesfsConfig;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "aesfs",
    version,
    about = "Passthrough filesystem with AES-encrypted file names",
    long_about = "aesfs: mount a directory whose file and directory names are stored AES-encrypted"
)]
struct Cli {
    /// Path to aesfs.toml configuration file
    #[arg(long, short = 'c', env = "AESFS_CONFIG", default_value = "/etc/aesfs/config.toml")]
    config: PathBuf,

    /// More logging (-v info, -vv debug); overrides the config log level
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize an empty directory as an encrypted storage root
    Init {
        /// Storage root (created if missing)
        encrypted: PathBuf,
    },

    /// Mount the decrypted view of a storage root (requires FUSE)
    ///
    /// An empty storage root is initialized on first mount.
    #[cfg(feature = "fuse")]
    Mount {
        /// Storage root holding encrypted names
        encrypted: PathBuf,
        /// Local mountpoint
        decrypted: PathBuf,
        /// Mount read-only
        #[arg(long)]
        read_only: bool,
        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,
    },

    /// Unmount an aesfs mountpoint (requires FUSE)
    #[cfg(feature = "fuse")]
    Unmount {
        /// Local mountpoint to unmount
        mountpoint: PathBuf,
    },

    /// Change the password protecting the master key
    ///
    /// Encoded names on disk are unaffected.
    Passwd {
        /// Storage root
        encrypted: PathBuf,
    },

    /// List a directory of a storage root without mounting it
    Ls {
        /// Storage root
        encrypted: PathBuf,
        /// Directory inside the decrypted view (default: /)
        #[arg(default_value = "/")]
        dir: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AesfsConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    init_logging(&log_level(cli.verbose, &config.log.level), &config.log.format);

    match cli.command {
        Commands::Init { encrypted } => cmd_init(&config, &encrypted),
        #[cfg(feature = "fuse")]
        Commands::Mount {
            encrypted,
            decrypted,
            read_only,
            allow_other,
        } => cmd_mount(&config, &encrypted, &decrypted, read_only, allow_other).await,
        #[cfg(feature = "fuse")]
        Commands::Unmount { mountpoint } => cmd_unmount(&mountpoint),
        Commands::Passwd { encrypted } => cmd_passwd(&config, &encrypted),
        Commands::Ls { encrypted, dir } => cmd_ls(&encrypted, &dir),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn log_level(verbose: u8, configured: &str) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Passwords ─────────────────────────────────────────────────────────────────

/// Existing password: `env_var` if set, otherwise a terminal prompt.
fn read_password(env_var: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(pw) = std::env::var(env_var) {
        tracing::debug!("password taken from {env_var}");
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

/// New password: `env_var` if set, otherwise prompted twice.
fn read_new_password(config: &AesfsConfig, env_var: &str) -> Result<SecretString> {
    let pw = match std::env::var(env_var) {
        Ok(pw) => SecretString::from(pw),
        Err(_) => {
            let first = read_password_prompt("New password: ")?;
            let second = read_password_prompt("Repeat password: ")?;
            if first.expose_secret() != second.expose_secret() {
                anyhow::bail!("passwords do not match");
            }
            first
        }
    };
    check_new_password(config, &pw)?;
    Ok(pw)
}

fn read_password_prompt(prompt: &str) -> Result<SecretString> {
    let pw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(pw))
}

fn check_new_password(config: &AesfsConfig, pw: &SecretString) -> Result<()> {
    if pw.expose_secret().is_empty() && !config.security.allow_empty_password {
        anyhow::bail!("empty password refused (set security.allow_empty_password to allow)");
    }
    Ok(())
}

// ── `aesfs init` ──────────────────────────────────────────────────────────────

fn cmd_init(config: &AesfsConfig, encrypted: &Path) -> Result<()> {
    std::fs::create_dir_all(encrypted)
        .with_context(|| format!("creating storage root: {}", encrypted.display()))?;

    let password = read_new_password(config, "AESFS_PASSWORD")?;
    aesfs_crypto::init(encrypted, &password)
        .with_context(|| format!("initializing {}", encrypted.display()))?;

    println!(
        "Initialized {} ({})",
        encrypted.display(),
        aesfs_crypto::KEY_FILE_NAME
    );
    Ok(())
}

// ── `aesfs mount` (requires fuse feature) ─────────────────────────────────────

#[cfg(feature = "fuse")]
async fn cmd_mount(
    config: &AesfsConfig,
    encrypted: &Path,
    decrypted: &Path,
    read_only: bool,
    allow_other: bool,
) -> Result<()> {
    if !encrypted.is_dir() {
        anyhow::bail!("storage root not found: {}", encrypted.display());
    }

    // An empty root is initialized by the mount, so treat the password as new.
    let empty = std::fs::read_dir(encrypted)
        .with_context(|| format!("reading storage root: {}", encrypted.display()))?
        .next()
        .is_none();
    let password = if empty {
        read_new_password(config, "AESFS_PASSWORD")?
    } else {
        read_password("AESFS_PASSWORD", "Password: ")?
    };

    // Ensure mountpoint exists
    tokio::fs::create_dir_all(decrypted)
        .await
        .with_context(|| format!("creating mountpoint: {}", decrypted.display()))?;

    println!("Mounting {} → {}", encrypted.display(), decrypted.display());
    println!("Press Ctrl-C or run `aesfs unmount {}` to stop.", decrypted.display());

    aesfs_fuse::mount(aesfs_fuse::MountConfig {
        root: encrypted.to_path_buf(),
        mountpoint: decrypted.to_path_buf(),
        password,
        fs_name: config.mount.fs_name.clone(),
        attr_ttl: std::time::Duration::from_secs(config.mount.attr_ttl_secs),
        max_write: config.mount.max_write_kib.saturating_mul(1024),
        read_only: read_only || config.mount.read_only,
        allow_other: allow_other || config.mount.allow_other,
    })
    .await
    .context("FUSE mount failed")
}

// ── `aesfs unmount` (requires fuse feature) ───────────────────────────────────

#[cfg(feature = "fuse")]
fn cmd_unmount(mountpoint: &Path) -> Result<()> {
    // macOS: use umount directly (works with FUSE-T and macFUSE)
    // Linux: use fusermount3 first, fall back to umount
    #[cfg(target_os = "macos")]
    {
        let status = std::process::Command::new("umount").arg(mountpoint).status();
        match status {
            Ok(s) if s.success() => {
                println!("Unmounted: {}", mountpoint.display());
                return Ok(());
            }
            Ok(s) => anyhow::bail!(
                "umount exited {}: try `diskutil unmount {}`",
                s,
                mountpoint.display()
            ),
            Err(e) => anyhow::bail!("failed to run umount: {e}"),
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        let status = std::process::Command::new("fusermount3")
            .arg("-u")
            .arg(mountpoint)
            .status();

        match status {
            Ok(s) if s.success() => {
                println!("Unmounted: {}", mountpoint.display());
                Ok(())
            }
            Ok(s) => {
                // Fallback: plain umount (works as root)
                let fallback = std::process::Command::new("umount").arg(mountpoint).status();
                match fallback {
                    Ok(f) if f.success() => {
                        println!("Unmounted: {}", mountpoint.display());
                        Ok(())
                    }
                    _ => anyhow::bail!(
                        "fusermount3 exited {}: use `fusermount3 -u {}` or `umount {}` manually",
                        s,
                        mountpoint.display(),
                        mountpoint.display()
                    ),
                }
            }
            Err(e) => anyhow::bail!("failed to run fusermount3: {e}"),
        }
    }
}

// ── `aesfs passwd` ────────────────────────────────────────────────────────────

fn cmd_passwd(config: &AesfsConfig, encrypted: &Path) -> Result<()> {
    let key_file = aesfs_crypto::KeyFile::load(encrypted)
        .with_context(|| format!("reading key file in {}", encrypted.display()))?;

    let old = read_password("AESFS_PASSWORD", "Current password: ")?;
    // Verify before asking for the new one.
    key_file.unlock(&old).context("cannot unlock")?;

    let new = read_new_password(config, "AESFS_NEW_PASSWORD")?;
    let rewrapped = key_file.rewrap(&old, &new).context("re-wrapping master key")?;
    rewrapped
        .save(encrypted)
        .with_context(|| format!("writing key file in {}", encrypted.display()))?;
    tracing::info!(root = %encrypted.display(), "master key re-wrapped");

    println!("Password changed for {}", encrypted.display());
    Ok(())
}

// ── `aesfs ls` ────────────────────────────────────────────────────────────────

fn cmd_ls(encrypted: &Path, dir: &str) -> Result<()> {
    let password = read_password("AESFS_PASSWORD", "Password: ")?;
    let translator = aesfs_fuse::volume::open(encrypted, &password)
        .with_context(|| format!("opening {}", encrypted.display()))?;
    let fs = aesfs_fuse::Passthrough::new(translator);

    let mut entries = fs
        .readdir(OsStr::new(dir))
        .with_context(|| format!("listing {dir}"))?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        println!("{}{}", entry.name, kind_suffix(entry.kind));
    }
    Ok(())
}

fn kind_suffix(kind: aesfs_fuse::EntryKind) -> &'static str {
    match kind {
        aesfs_fuse::EntryKind::Directory => "/",
        aesfs_fuse::EntryKind::Symlink => "@",
        aesfs_fuse::EntryKind::NamedPipe => "|",
        aesfs_fuse::EntryKind::Socket => "=",
        _ => "",
    }
}

// ── `aesfs config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &AesfsConfig, path: &Path) -> Result<()> {
    println!("# config: {}", path.display());
    print!("{}", config.to_toml().context("rendering config")?);
    Ok(())
}

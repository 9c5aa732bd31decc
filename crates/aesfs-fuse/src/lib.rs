//! aesfs-fuse: passthrough FUSE driver over an encrypted-name storage root
//!
//! Linux: fuse3 crate (kernel FUSE)
//! macOS: fuse3 with macFUSE 4.x (feature: macos-fuse)
//!
//! The passthrough verbs and path translation are always compiled so they can
//! be used (and tested) without a FUSE runtime; the mount API needs `fuse`.

pub mod driver;
pub mod passthrough;
pub mod translate;
pub mod volume;

// Re-export the mount API when the fuse feature is enabled
#[cfg(feature = "fuse")]
pub use driver::{mount, AesFs, MountConfig};

pub use passthrough::{DirEntry, EntryKind, Passthrough, StatFs, XattrReply};
pub use translate::{is_control_entry, PathTranslator, TranslateError, NAME_MAX, PATH_MAX};

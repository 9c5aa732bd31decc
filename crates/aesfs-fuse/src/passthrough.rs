//! Filesystem verbs forwarded to the storage root.
//!
//! Every verb takes virtual paths, translates them through [`PathTranslator`]
//! and calls the matching OS primitive. Failures come back as `io::Error`
//! carrying the OS errno unchanged. File content is not transformed.
//!
//! Everything here is synchronous; the FUSE adapter runs it on the blocking
//! pool.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{
    DirBuilderExt, DirEntryExt, FileExt, FileTypeExt, OpenOptionsExt, PermissionsExt,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::fcntl::AT_FDCWD;
use nix::sys::stat::{mknod, utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::statvfs;
use nix::sys::time::TimeSpec;
use nix::unistd::{access, AccessFlags};
use tracing::{debug, info};

use crate::translate::PathTranslator;

// ── Types ─────────────────────────────────────────────────────────────────

/// File type of a directory entry, independent of the FUSE crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    NamedPipe,
    Socket,
}

impl EntryKind {
    pub(crate) fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_block_device() {
            EntryKind::BlockDevice
        } else if ft.is_char_device() {
            EntryKind::CharDevice
        } else if ft.is_fifo() {
            EntryKind::NamedPipe
        } else if ft.is_socket() {
            EntryKind::Socket
        } else {
            EntryKind::File
        }
    }
}

/// One decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub ino: u64,
}

/// Filesystem statistics for the storage root's filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Reply to a size-only (`size == 0`) or a data read of an xattr query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrReply {
    Size(u32),
    Data(Vec<u8>),
}

// ── Passthrough ───────────────────────────────────────────────────────────

/// The passthrough filesystem. One instance per mount.
#[derive(Debug)]
pub struct Passthrough {
    translator: PathTranslator,
    /// Open file handles: fh → file
    handles: Mutex<HashMap<u64, Arc<File>>>,
    /// Monotonically increasing file-handle counter
    next_fh: AtomicU64,
}

impl Passthrough {
    pub fn new(translator: PathTranslator) -> Self {
        Passthrough {
            translator,
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    /// Number of open file handles.
    pub fn open_handles(&self) -> usize {
        self.lock_handles().len()
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<File>>> {
        // a panicking holder cannot leave the map inconsistent
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, fh: u64) -> io::Result<Arc<File>> {
        self.lock_handles()
            .get(&fh)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    fn insert_handle(&self, file: File) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.lock_handles().insert(fh, Arc::new(file));
        fh
    }

    // ── Attributes ────────────────────────────────────────────────────────

    /// lstat of a virtual path.
    pub fn getattr(&self, path: &OsStr) -> io::Result<Metadata> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, "getattr");
        fs::symlink_metadata(real)
    }

    /// fstat of an open handle.
    pub fn getattr_fh(&self, fh: u64) -> io::Result<Metadata> {
        self.handle(fh)?.metadata()
    }

    /// Attributes of `name` inside `parent`.
    pub fn lookup(&self, parent: &OsStr, name: &OsStr) -> io::Result<Metadata> {
        let real = self.translator.join(parent, name)?;
        fs::symlink_metadata(real)
    }

    pub fn access(&self, path: &OsStr, mask: i32) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        access(&real, AccessFlags::from_bits_truncate(mask))?;
        Ok(())
    }

    pub fn chmod(&self, path: &OsStr, mode: u32) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        info!(path = ?path, mode = format_args!("{mode:o}"), "chmod");
        fs::set_permissions(real, fs::Permissions::from_mode(mode & 0o7777))
    }

    /// lchown; `None` leaves that id unchanged.
    pub fn chown(&self, path: &OsStr, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        info!(path = ?path, ?uid, ?gid, "chown");
        std::os::unix::fs::lchown(real, uid, gid)
    }

    pub fn truncate(&self, path: &OsStr, size: u64) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        info!(path = ?path, size, "truncate");
        OpenOptions::new().write(true).open(real)?.set_len(size)
    }

    pub fn truncate_fh(&self, fh: u64, size: u64) -> io::Result<()> {
        self.handle(fh)?.set_len(size)
    }

    /// Set access and modification times without following symlinks.
    /// `None` leaves that timestamp unchanged.
    pub fn utimens(
        &self,
        path: &OsStr,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        info!(path = ?path, "utimens");
        utimensat(
            AT_FDCWD,
            &real,
            &to_timespec(atime),
            &to_timespec(mtime),
            UtimensatFlags::NoFollowSymlink,
        )?;
        Ok(())
    }

    // ── Links ─────────────────────────────────────────────────────────────

    /// Symlink targets are stored verbatim, not translated.
    pub fn readlink(&self, path: &OsStr) -> io::Result<OsString> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, "readlink");
        Ok(fs::read_link(real)?.into_os_string())
    }

    pub fn symlink(&self, parent: &OsStr, name: &OsStr, target: &OsStr) -> io::Result<Metadata> {
        let real = self.translator.join(parent, name)?;
        info!(parent = ?parent, name = ?name, target = ?target, "symlink");
        std::os::unix::fs::symlink(target, &real)?;
        fs::symlink_metadata(real)
    }

    /// Hard link `path` as `name` inside `new_parent`.
    pub fn link(&self, path: &OsStr, new_parent: &OsStr, new_name: &OsStr) -> io::Result<Metadata> {
        let from = self.translator.to_storage_path(path)?;
        let to = self.translator.join(new_parent, new_name)?;
        info!(from = ?path, to_parent = ?new_parent, to_name = ?new_name, "link");
        fs::hard_link(from, &to)?;
        fs::symlink_metadata(to)
    }

    // ── Namespace ─────────────────────────────────────────────────────────

    /// Decoded entries of a directory, in on-disk order. `.`, `..` and the
    /// key file are left out; an undecodable name fails the whole call.
    pub fn readdir(&self, path: &OsStr) -> io::Result<Vec<DirEntry>> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, "readdir");

        let mut entries = Vec::new();
        for entry in fs::read_dir(real)? {
            let entry = entry?;
            let raw = entry.file_name();
            let Some(name) = self.translator.decode_entry(&raw)? else {
                continue;
            };
            entries.push(DirEntry {
                name,
                kind: EntryKind::from_file_type(entry.file_type()?),
                ino: entry.ino(),
            });
        }
        Ok(entries)
    }

    /// [`readdir`](Self::readdir) plus each entry's attributes.
    pub fn readdir_plus(&self, path: &OsStr) -> io::Result<Vec<(DirEntry, Metadata)>> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, "readdirplus");

        let mut entries = Vec::new();
        for entry in fs::read_dir(real)? {
            let entry = entry?;
            let raw = entry.file_name();
            let Some(name) = self.translator.decode_entry(&raw)? else {
                continue;
            };
            let meta = fs::symlink_metadata(entry.path())?;
            entries.push((
                DirEntry {
                    name,
                    kind: EntryKind::from_file_type(meta.file_type()),
                    ino: entry.ino(),
                },
                meta,
            ));
        }
        Ok(entries)
    }

    /// Create a file node (regular file, fifo, device or socket).
    pub fn mknod(&self, parent: &OsStr, name: &OsStr, mode: u32, rdev: u32) -> io::Result<Metadata> {
        let real = self.translator.join(parent, name)?;
        info!(parent = ?parent, name = ?name, mode = format_args!("{mode:o}"), "mknod");
        let mode = mode as libc::mode_t;
        mknod(
            &real,
            SFlag::from_bits_truncate(mode & libc::S_IFMT),
            Mode::from_bits_truncate(mode & !libc::S_IFMT),
            rdev as libc::dev_t,
        )?;
        fs::symlink_metadata(real)
    }

    pub fn mkdir(&self, parent: &OsStr, name: &OsStr, mode: u32) -> io::Result<Metadata> {
        let real = self.translator.join(parent, name)?;
        info!(parent = ?parent, name = ?name, mode = format_args!("{mode:o}"), "mkdir");
        fs::DirBuilder::new().mode(mode).create(&real)?;
        fs::symlink_metadata(real)
    }

    pub fn unlink(&self, parent: &OsStr, name: &OsStr) -> io::Result<()> {
        let real = self.translator.join(parent, name)?;
        info!(parent = ?parent, name = ?name, "unlink");
        fs::remove_file(real)
    }

    pub fn rmdir(&self, parent: &OsStr, name: &OsStr) -> io::Result<()> {
        let real = self.translator.join(parent, name)?;
        info!(parent = ?parent, name = ?name, "rmdir");
        fs::remove_dir(real)
    }

    pub fn rename(
        &self,
        from_parent: &OsStr,
        from_name: &OsStr,
        to_parent: &OsStr,
        to_name: &OsStr,
    ) -> io::Result<()> {
        let from = self.translator.join(from_parent, from_name)?;
        let to = self.translator.join(to_parent, to_name)?;
        info!(
            from_parent = ?from_parent,
            from_name = ?from_name,
            to_parent = ?to_parent,
            to_name = ?to_name,
            "rename"
        );
        fs::rename(from, to)
    }

    // ── File handles ──────────────────────────────────────────────────────

    /// Open an existing file with the client's `open(2)` flags.
    pub fn open(&self, path: &OsStr, flags: i32) -> io::Result<u64> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, flags, "open");
        let file = open_options(flags).open(real)?;
        Ok(self.insert_handle(file))
    }

    /// Create and open `name` inside `parent`.
    pub fn create(
        &self,
        parent: &OsStr,
        name: &OsStr,
        mode: u32,
        flags: i32,
    ) -> io::Result<(u64, Metadata)> {
        let real = self.translator.join(parent, name)?;
        info!(parent = ?parent, name = ?name, mode = format_args!("{mode:o}"), "create");

        let mut opts = open_options(flags & !libc::O_CREAT);
        // std refuses create(true) without write access
        opts.write(true).create(true).mode(mode);
        let file = opts.open(real)?;
        let meta = file.metadata()?;
        Ok((self.insert_handle(file), meta))
    }

    /// Read up to `size` bytes at `offset`. Short only at end of file.
    pub fn read(&self, fh: u64, offset: u64, size: u32) -> io::Result<Vec<u8>> {
        let file = self.handle(fh)?;
        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        debug!(fh, offset, size, read = filled, "read");
        Ok(buf)
    }

    pub fn write(&self, fh: u64, offset: u64, data: &[u8]) -> io::Result<usize> {
        let file = self.handle(fh)?;
        file.write_all_at(data, offset)?;
        debug!(fh, offset, len = data.len(), "write");
        Ok(data.len())
    }

    /// Validates the handle. Data reaches the OS on every write already.
    pub fn flush(&self, fh: u64) -> io::Result<()> {
        self.handle(fh).map(|_| ())
    }

    pub fn fsync(&self, fh: u64, datasync: bool) -> io::Result<()> {
        let file = self.handle(fh)?;
        if datasync {
            file.sync_data()
        } else {
            file.sync_all()
        }
    }

    /// Drop a handle. The file closes once no in-flight call holds it.
    pub fn release(&self, fh: u64) -> io::Result<()> {
        self.lock_handles()
            .remove(&fh)
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    #[cfg(target_os = "linux")]
    pub fn fallocate(&self, fh: u64, offset: u64, length: u64, mode: i32) -> io::Result<()> {
        use nix::fcntl::{fallocate, FallocateFlags};
        use std::os::fd::AsFd;

        let file = self.handle(fh)?;
        fallocate(
            file.as_fd(),
            FallocateFlags::from_bits_truncate(mode),
            offset as libc::off_t,
            length as libc::off_t,
        )?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn fallocate(&self, fh: u64, _offset: u64, _length: u64, _mode: i32) -> io::Result<()> {
        self.handle(fh)?;
        Err(io::Error::from_raw_os_error(libc::EOPNOTSUPP))
    }

    // ── Filesystem ────────────────────────────────────────────────────────

    /// statvfs of the storage filesystem. `namelen` is the longest plaintext
    /// name that still encodes within the underlying limit.
    pub fn statfs(&self, path: &OsStr) -> io::Result<StatFs> {
        let real = self.translator.to_storage_path(path)?;
        let st = statvfs(&real)?;

        Ok(StatFs {
            blocks: u64::from(st.blocks()),
            bfree: u64::from(st.blocks_free()),
            bavail: u64::from(st.blocks_available()),
            files: u64::from(st.files()),
            ffree: u64::from(st.files_free()),
            bsize: st.block_size() as u32,
            namelen: PathTranslator::max_plaintext_name_len() as u32,
            frsize: st.fragment_size() as u32,
        })
    }

    // ── Extended attributes ───────────────────────────────────────────────

    /// `XATTR_CREATE` fails on an existing attribute, `XATTR_REPLACE` on a
    /// missing one.
    pub fn setxattr(&self, path: &OsStr, name: &OsStr, value: &[u8], flags: i32) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        info!(path = ?path, name = ?name, len = value.len(), "setxattr");
        if flags & (libc::XATTR_CREATE | libc::XATTR_REPLACE) != 0 {
            let exists = xattr::get(&real, name)?.is_some();
            if flags & libc::XATTR_CREATE != 0 && exists {
                return Err(io::Error::from_raw_os_error(libc::EEXIST));
            }
            if flags & libc::XATTR_REPLACE != 0 && !exists {
                return Err(io::Error::from_raw_os_error(ENOATTR));
            }
        }
        xattr::set(&real, name, value)
    }

    /// `size == 0` asks for the value's size only.
    pub fn getxattr(&self, path: &OsStr, name: &OsStr, size: u32) -> io::Result<XattrReply> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, name = ?name, size, "getxattr");
        let value = xattr::get(&real, name)?.ok_or_else(|| io::Error::from_raw_os_error(ENOATTR))?;
        xattr_reply(value, size)
    }

    /// NUL-separated attribute names. `size == 0` asks for the size only.
    pub fn listxattr(&self, path: &OsStr, size: u32) -> io::Result<XattrReply> {
        let real = self.translator.to_storage_path(path)?;
        debug!(path = ?path, size, "listxattr");
        let mut names = Vec::new();
        for name in xattr::list(&real)? {
            names.extend_from_slice(name.as_bytes());
            names.push(0);
        }
        xattr_reply(names, size)
    }

    pub fn removexattr(&self, path: &OsStr, name: &OsStr) -> io::Result<()> {
        let real = self.translator.to_storage_path(path)?;
        info!(path = ?path, name = ?name, "removexattr");
        xattr::remove(&real, name)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
const ENOATTR: i32 = libc::ENODATA;
#[cfg(not(target_os = "linux"))]
const ENOATTR: i32 = libc::ENOATTR;

/// Size-only reply for `size == 0`, ERANGE when `data` does not fit.
fn xattr_reply(data: Vec<u8>, size: u32) -> io::Result<XattrReply> {
    let len = u32::try_from(data.len()).map_err(|_| io::Error::from_raw_os_error(libc::E2BIG))?;
    if size == 0 {
        Ok(XattrReply::Size(len))
    } else if len > size {
        Err(io::Error::from_raw_os_error(libc::ERANGE))
    } else {
        Ok(XattrReply::Data(data))
    }
}

/// Map `open(2)` flags onto `OpenOptions`.
fn open_options(flags: i32) -> OpenOptions {
    let mut opts = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => opts.write(true),
        libc::O_RDWR => opts.read(true).write(true),
        _ => opts.read(true),
    };
    opts.custom_flags(flags & !libc::O_ACCMODE);
    opts
}

/// `None` leaves the timestamp unchanged.
fn to_timespec(t: Option<SystemTime>) -> TimeSpec {
    let Some(t) = t else {
        return TimeSpec::UTIME_OMIT;
    };
    let (sec, nsec) = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, i64::from(d.subsec_nanos())),
        Err(e) => {
            let d = e.duration();
            let mut sec = -(d.as_secs() as i64);
            let mut nsec = i64::from(d.subsec_nanos());
            if nsec > 0 {
                sec -= 1;
                nsec = 1_000_000_000 - nsec;
            }
            (sec, nsec)
        }
    };
    TimeSpec::new(sec as libc::time_t, nsec as _)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aesfs_crypto::{DerivedKey, NameCipher};
    use std::os::unix::fs::MetadataExt;
    use std::time::Duration;

    fn setup() -> (tempfile::TempDir, Passthrough) {
        let dir = tempfile::tempdir().unwrap();
        let cipher = NameCipher::new(&DerivedKey::from_bytes([0x44u8; 32]));
        let fs = Passthrough::new(PathTranslator::new(dir.path().to_path_buf(), cipher));
        (dir, fs)
    }

    fn os(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn write_file(fs: &Passthrough, parent: &str, name: &str, data: &[u8]) {
        let (fh, _) = fs.create(os(parent), os(name), 0o644, libc::O_WRONLY).unwrap();
        assert_eq!(fs.write(fh, 0, data).unwrap(), data.len());
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_create_write_read() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "hello.txt", b"hello world");

        let fh = fs.open(os("/hello.txt"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(fh, 0, 100).unwrap(), b"hello world");
        assert_eq!(fs.read(fh, 6, 3).unwrap(), b"wor");
        assert!(fs.read(fh, 50, 10).unwrap().is_empty());
        fs.release(fh).unwrap();
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_on_disk_names_are_encoded() {
        let (dir, fs) = setup();
        fs.mkdir(os("/"), os("docs"), 0o755).unwrap();
        write_file(&fs, "/docs", "plan.md", b"x");

        let t = fs.translator();
        let expected = dir
            .path()
            .join(t.encode_segment(os("docs")).unwrap())
            .join(t.encode_segment(os("plan.md")).unwrap());
        assert!(expected.is_file());
        assert!(!dir.path().join("docs").exists());
    }

    #[test]
    fn test_content_is_plaintext_on_disk() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "note", b"visible bytes");
        let real = fs.translator().to_storage_path(os("/note")).unwrap();
        assert_eq!(fs::read(real).unwrap(), b"visible bytes");
    }

    #[test]
    fn test_readdir_decodes_and_hides_key_file() {
        let (dir, fs) = setup();
        fs::write(dir.path().join(aesfs_crypto::KEY_FILE_NAME), "{}").unwrap();
        fs.mkdir(os("/"), os("sub"), 0o755).unwrap();
        write_file(&fs, "/", "f", b"");

        let mut names: Vec<_> = fs
            .readdir(os("/"))
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            names,
            vec![("f".to_string(), EntryKind::File), ("sub".to_string(), EntryKind::Directory)]
        );
    }

    #[test]
    fn test_readdir_fails_on_stray_entry() {
        let (dir, fs) = setup();
        fs::write(dir.path().join("not-encoded.txt"), "").unwrap();
        let err = fs.readdir(os("/")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }

    #[test]
    fn test_readdir_plus_attrs() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "sized", b"12345");
        let entries = fs.readdir_plus(os("/")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.name, "sized");
        assert_eq!(entries[0].1.len(), 5);
    }

    #[test]
    fn test_missing_path_is_enoent() {
        let (_dir, fs) = setup();
        let err = fs.getattr(os("/nope")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        let err = fs.lookup(os("/"), os("nope")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_mkdir_existing_is_eexist() {
        let (_dir, fs) = setup();
        fs.mkdir(os("/"), os("d"), 0o755).unwrap();
        let err = fs.mkdir(os("/"), os("d"), 0o755).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
    }

    #[test]
    fn test_rmdir_non_empty_is_enotempty() {
        let (_dir, fs) = setup();
        fs.mkdir(os("/"), os("d"), 0o755).unwrap();
        write_file(&fs, "/d", "f", b"");
        let err = fs.rmdir(os("/"), os("d")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTEMPTY));

        fs.unlink(os("/d"), os("f")).unwrap();
        fs.rmdir(os("/"), os("d")).unwrap();
        assert!(fs.readdir(os("/")).unwrap().is_empty());
    }

    #[test]
    fn test_rename_across_directories() {
        let (_dir, fs) = setup();
        fs.mkdir(os("/"), os("a"), 0o755).unwrap();
        fs.mkdir(os("/"), os("b"), 0o755).unwrap();
        write_file(&fs, "/a", "x", b"moved");

        fs.rename(os("/a"), os("x"), os("/b"), os("y")).unwrap();
        assert!(fs.getattr(os("/a/x")).is_err());
        let fh = fs.open(os("/b/y"), libc::O_RDONLY).unwrap();
        assert_eq!(fs.read(fh, 0, 16).unwrap(), b"moved");
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_symlink_target_is_verbatim() {
        let (_dir, fs) = setup();
        let meta = fs.symlink(os("/"), os("ln"), os("../plain/target")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs.readlink(os("/ln")).unwrap(), OsString::from("../plain/target"));
    }

    #[test]
    fn test_hard_link() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "orig", b"shared");
        let meta = fs.link(os("/orig"), os("/"), os("alias")).unwrap();
        assert_eq!(meta.nlink(), 2);
        assert_eq!(fs.getattr(os("/orig")).unwrap().ino(), meta.ino());
    }

    #[test]
    fn test_mknod_regular_file() {
        let (_dir, fs) = setup();
        let meta = fs.mknod(os("/"), os("node"), libc::S_IFREG as u32 | 0o600, 0).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.mode() & 0o777, 0o600);
    }

    #[test]
    fn test_chmod_and_truncate() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "t", b"0123456789");

        fs.chmod(os("/t"), 0o600).unwrap();
        assert_eq!(fs.getattr(os("/t")).unwrap().mode() & 0o777, 0o600);

        fs.truncate(os("/t"), 4).unwrap();
        assert_eq!(fs.getattr(os("/t")).unwrap().len(), 4);

        let fh = fs.open(os("/t"), libc::O_RDWR).unwrap();
        fs.truncate_fh(fh, 1).unwrap();
        assert_eq!(fs.getattr_fh(fh).unwrap().len(), 1);
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_chown_to_self() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "own", b"");
        let meta = fs.getattr(os("/own")).unwrap();
        fs.chown(os("/own"), Some(meta.uid()), None).unwrap();
    }

    #[test]
    fn test_utimens() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "ts", b"");
        let mtime = UNIX_EPOCH + Duration::from_secs(1_000_000_000);

        fs.utimens(os("/ts"), None, Some(mtime)).unwrap();
        let meta = fs.getattr(os("/ts")).unwrap();
        assert_eq!(meta.mtime(), 1_000_000_000);
    }

    #[test]
    fn test_to_timespec_before_epoch() {
        let t = UNIX_EPOCH - Duration::from_millis(1500);
        let ts = to_timespec(Some(t));
        assert_eq!(ts.tv_sec(), -2);
        assert_eq!(ts.tv_nsec(), 500_000_000);
        assert_eq!(to_timespec(None), TimeSpec::UTIME_OMIT);
    }

    #[test]
    fn test_utimens_keeps_omitted_time() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "keep", b"");
        let atime = UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        let mtime = UNIX_EPOCH + Duration::new(1_000_000_000, 250);

        fs.utimens(os("/keep"), Some(atime), Some(mtime)).unwrap();
        fs.utimens(os("/keep"), None, Some(UNIX_EPOCH + Duration::from_secs(7))).unwrap();
        let meta = fs.getattr(os("/keep")).unwrap();
        assert_eq!(meta.atime(), 1_500_000_000);
        assert_eq!(meta.mtime(), 7);
    }

    #[test]
    fn test_utimens_does_not_follow_symlink() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "target", b"");
        fs.symlink(os("/"), os("ln"), os("target")).unwrap();
        let before = fs.getattr(os("/target")).unwrap().mtime();

        fs.utimens(os("/ln"), None, Some(UNIX_EPOCH + Duration::from_secs(42))).unwrap();
        assert_eq!(fs.getattr(os("/ln")).unwrap().mtime(), 42);
        assert_eq!(fs.getattr(os("/target")).unwrap().mtime(), before);
    }

    #[test]
    fn test_xattr_reply_sizes() {
        assert_eq!(xattr_reply(b"abc".to_vec(), 0).unwrap(), XattrReply::Size(3));
        assert_eq!(
            xattr_reply(b"abc".to_vec(), 3).unwrap(),
            XattrReply::Data(b"abc".to_vec())
        );
        assert_eq!(
            xattr_reply(b"abc".to_vec(), 2).unwrap_err().raw_os_error(),
            Some(libc::ERANGE)
        );
    }

    #[test]
    fn test_mknod_fifo() {
        let (_dir, fs) = setup();
        let meta = fs.mknod(os("/"), os("pipe"), libc::S_IFIFO as u32 | 0o640, 0).unwrap();
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.mode() & 0o777, 0o640);
        let entries = fs.readdir(os("/")).unwrap();
        assert_eq!(entries[0].kind, EntryKind::NamedPipe);
    }

    #[test]
    fn test_missing_xattr() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "x", b"");
        match fs.getxattr(os("/x"), os("user.absent"), 0) {
            Err(e) => assert!(
                e.raw_os_error() == Some(ENOATTR) || e.raw_os_error() == Some(libc::ENOTSUP),
                "{e}"
            ),
            Ok(reply) => panic!("unexpected reply {reply:?}"),
        }
    }

    #[test]
    fn test_access() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "a", b"");
        fs.access(os("/a"), libc::F_OK).unwrap();
        assert_eq!(
            fs.access(os("/missing"), libc::F_OK).unwrap_err().raw_os_error(),
            Some(libc::ENOENT)
        );
    }

    #[test]
    fn test_stale_handle_is_ebadf() {
        let (_dir, fs) = setup();
        assert_eq!(fs.read(99, 0, 1).unwrap_err().raw_os_error(), Some(libc::EBADF));
        assert_eq!(fs.release(99).unwrap_err().raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_handles_are_unique() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "h", b"");
        let a = fs.open(os("/h"), libc::O_RDONLY).unwrap();
        let b = fs.open(os("/h"), libc::O_RDONLY).unwrap();
        assert_ne!(a, b);
        fs.flush(a).unwrap();
        fs.fsync(b, true).unwrap();
        fs.release(a).unwrap();
        fs.release(b).unwrap();
    }

    #[test]
    fn test_write_at_offset_and_append_open() {
        let (_dir, fs) = setup();
        write_file(&fs, "/", "w", b"aaaa");
        let fh = fs.open(os("/w"), libc::O_RDWR).unwrap();
        fs.write(fh, 2, b"bbbb").unwrap();
        assert_eq!(fs.read(fh, 0, 64).unwrap(), b"aabbbb");
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_statfs_reports_plaintext_namelen() {
        let (_dir, fs) = setup();
        let st = fs.statfs(os("/")).unwrap();
        assert_eq!(st.namelen, 175);
        assert!(st.bsize > 0);
    }

    #[test]
    fn test_long_name_rejected_before_os() {
        let (_dir, fs) = setup();
        let name = "n".repeat(200);
        let err = fs.create(os("/"), os(&name), 0o644, libc::O_WRONLY).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENAMETOOLONG));
    }
}

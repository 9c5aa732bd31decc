//! FUSE adapter: serves the passthrough verbs at a mountpoint.
//!
//! ```text
//! /mnt/plain/a/b.txt   (what clients see)
//!       │  PathFilesystem verb
//!       ▼
//! Passthrough  ──  PathTranslator  ──  NameCipher
//!       │
//!       ▼
//! /srv/enc/<enc("a")>/<enc("b.txt")>   (what the disk holds)
//! ```
//!
//! Every verb runs on tokio's blocking pool and returns the OS errno
//! unchanged. The storage root is unlocked once in [`mount`] before the
//! session starts.

#[cfg(feature = "fuse")]
mod inner {
    use std::ffi::{OsStr, OsString};
    use std::fs::Metadata;
    use std::io;
    use std::num::NonZeroU32;
    use std::os::unix::ffi::OsStringExt;
    use std::os::unix::fs::MetadataExt;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use aesfs_core::{AesfsError, AesfsResult};
    use bytes::Bytes;
    use fuse3::path::prelude::*;
    use fuse3::{Errno, FileType, MountOptions, Timestamp};
    use futures_util::stream;
    use secrecy::SecretString;
    use tracing::{debug, info, warn};

    use crate::passthrough::{EntryKind, Passthrough, XattrReply};
    use crate::volume;

    // ── Configuration ─────────────────────────────────────────────────────────

    const DEFAULT_MAX_WRITE: u32 = 128 * 1024;

    // ── AesFs ─────────────────────────────────────────────────────────────────

    /// The FUSE filesystem driver.
    pub struct AesFs {
        inner: Arc<Passthrough>,
        /// TTL for entry and attribute replies (FUSE kernel cache)
        ttl: Duration,
        max_write: NonZeroU32,
    }

    impl AesFs {
        pub fn new(passthrough: Passthrough, ttl: Duration, max_write: u32) -> Self {
            AesFs {
                inner: Arc::new(passthrough),
                ttl,
                max_write: NonZeroU32::new(max_write)
                    .or(NonZeroU32::new(DEFAULT_MAX_WRITE))
                    .unwrap_or(NonZeroU32::MIN),
            }
        }

        /// Run a passthrough call on the blocking pool.
        async fn blocking<T, F>(&self, f: F) -> fuse3::Result<T>
        where
            F: FnOnce(&Passthrough) -> io::Result<T> + Send + 'static,
            T: Send + 'static,
        {
            let inner = Arc::clone(&self.inner);
            match tokio::task::spawn_blocking(move || f(&inner)).await {
                Ok(res) => res.map_err(errno),
                Err(e) => {
                    warn!("blocking task failed: {e}");
                    Err(Errno::from(libc::EIO))
                }
            }
        }

        fn entry(&self, meta: &Metadata) -> ReplyEntry {
            ReplyEntry {
                ttl: self.ttl,
                attr: file_attr(meta),
            }
        }
    }

    fn errno(e: io::Error) -> Errno {
        Errno::from(e.raw_os_error().unwrap_or(libc::EIO))
    }

    fn enoent() -> io::Error {
        io::Error::from_raw_os_error(libc::ENOENT)
    }

    fn file_type(kind: EntryKind) -> FileType {
        match kind {
            EntryKind::File => FileType::RegularFile,
            EntryKind::Directory => FileType::Directory,
            EntryKind::Symlink => FileType::Symlink,
            EntryKind::BlockDevice => FileType::BlockDevice,
            EntryKind::CharDevice => FileType::CharDevice,
            EntryKind::NamedPipe => FileType::NamedPipe,
            EntryKind::Socket => FileType::Socket,
        }
    }

    /// Seconds and nanoseconds around the epoch; unrepresentable times fall
    /// back to the epoch.
    fn system_time(secs: i64, nsecs: i64) -> SystemTime {
        let nsecs = nsecs.clamp(0, 999_999_999) as u32;
        let time = if secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::new(secs as u64, nsecs))
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(secs.unsigned_abs()))
                .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nsecs))))
        };
        time.unwrap_or(UNIX_EPOCH)
    }

    fn from_timestamp(t: Timestamp) -> SystemTime {
        system_time(t.sec, i64::from(t.nsec))
    }

    /// Translate host `stat` data into a FUSE attribute record.
    fn file_attr(meta: &Metadata) -> FileAttr {
        FileAttr {
            size: meta.size(),
            blocks: meta.blocks(),
            atime: system_time(meta.atime(), meta.atime_nsec()).into(),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()).into(),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()).into(),
            #[cfg(target_os = "macos")]
            crtime: meta.created().unwrap_or(UNIX_EPOCH).into(),
            kind: file_type(EntryKind::from_file_type(meta.file_type())),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
            #[cfg(target_os = "macos")]
            flags: 0,
        }
    }

    /// Changes requested by one `setattr`, applied as mode, owner, size and
    /// then times, so a chmod or truncate cannot clobber the new times.
    #[derive(Debug, Default, Clone, Copy)]
    struct AttrChanges {
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    }

    impl From<SetAttr> for AttrChanges {
        fn from(set_attr: SetAttr) -> Self {
            AttrChanges {
                mode: set_attr.mode,
                uid: set_attr.uid,
                gid: set_attr.gid,
                size: set_attr.size,
                atime: set_attr.atime.map(from_timestamp),
                mtime: set_attr.mtime.map(from_timestamp),
            }
        }
    }

    impl AttrChanges {
        /// Apply to `path` (or `fh` for size) and return the new attributes.
        fn apply(
            self,
            fs: &Passthrough,
            path: Option<&OsStr>,
            fh: Option<u64>,
        ) -> io::Result<Metadata> {
            let need_path = || path.ok_or_else(enoent);

            if let Some(mode) = self.mode {
                fs.chmod(need_path()?, mode)?;
            }
            if self.uid.is_some() || self.gid.is_some() {
                fs.chown(need_path()?, self.uid, self.gid)?;
            }
            if let Some(size) = self.size {
                match fh {
                    Some(fh) => fs.truncate_fh(fh, size)?,
                    None => fs.truncate(need_path()?, size)?,
                }
            }
            if self.atime.is_some() || self.mtime.is_some() {
                fs.utimens(need_path()?, self.atime, self.mtime)?;
            }

            match fh {
                Some(fh) => fs.getattr_fh(fh),
                None => fs.getattr(need_path()?),
            }
        }
    }

    /// `.` and `..` followed by `children`, each numbered from 1. Only
    /// entries past the kernel's `offset` cookie are kept.
    fn entries_after<T>(
        dot: T,
        dotdot: T,
        children: impl IntoIterator<Item = (OsString, T)>,
        offset: u64,
    ) -> Vec<(u64, OsString, T)> {
        [(OsString::from("."), dot), (OsString::from(".."), dotdot)]
            .into_iter()
            .chain(children)
            .zip(1u64..)
            .filter(|(_, entry_offset)| *entry_offset > offset)
            .map(|((name, item), entry_offset)| (entry_offset, name, item))
            .collect()
    }

    // ── PathFilesystem impl ────────────────────────────────────────────────────

    impl PathFilesystem for AesFs {
        async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
            debug!(root = %self.inner.translator().root().display(), "aesfs init");
            Ok(ReplyInit {
                max_write: self.max_write,
            })
        }

        async fn destroy(&self, _req: Request) {
            info!("aesfs unmounted");
        }

        async fn lookup(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            let (parent, name) = (parent.to_os_string(), name.to_os_string());
            let meta = self.blocking(move |fs| fs.lookup(&parent, &name)).await?;
            Ok(self.entry(&meta))
        }

        async fn getattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            fh: Option<u64>,
            _flags: u32,
        ) -> fuse3::Result<ReplyAttr> {
            let path = path.map(OsStr::to_os_string);
            let meta = self
                .blocking(move |fs| match (fh, path) {
                    (Some(fh), _) => fs.getattr_fh(fh),
                    (None, Some(path)) => fs.getattr(&path),
                    (None, None) => Err(enoent()),
                })
                .await?;
            Ok(ReplyAttr {
                ttl: self.ttl,
                attr: file_attr(&meta),
            })
        }

        async fn setattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            fh: Option<u64>,
            set_attr: SetAttr,
        ) -> fuse3::Result<ReplyAttr> {
            let path = path.map(OsStr::to_os_string);
            let changes = AttrChanges::from(set_attr);
            let meta = self
                .blocking(move |fs| changes.apply(fs, path.as_deref(), fh))
                .await?;
            Ok(ReplyAttr {
                ttl: self.ttl,
                attr: file_attr(&meta),
            })
        }

        async fn readlink(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyData> {
            let path = path.to_os_string();
            let target = self.blocking(move |fs| fs.readlink(&path)).await?;
            Ok(ReplyData {
                data: Bytes::from(target.into_vec()),
            })
        }

        async fn symlink(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            link_path: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            let (parent, name, target) = (
                parent.to_os_string(),
                name.to_os_string(),
                link_path.to_os_string(),
            );
            let meta = self
                .blocking(move |fs| fs.symlink(&parent, &name, &target))
                .await?;
            Ok(self.entry(&meta))
        }

        async fn mknod(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            mode: u32,
            rdev: u32,
        ) -> fuse3::Result<ReplyEntry> {
            let (parent, name) = (parent.to_os_string(), name.to_os_string());
            let meta = self
                .blocking(move |fs| fs.mknod(&parent, &name, mode, rdev))
                .await?;
            Ok(self.entry(&meta))
        }

        async fn mkdir(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            mode: u32,
            umask: u32,
        ) -> fuse3::Result<ReplyEntry> {
            let (parent, name) = (parent.to_os_string(), name.to_os_string());
            let meta = self
                .blocking(move |fs| fs.mkdir(&parent, &name, mode & !umask))
                .await?;
            Ok(self.entry(&meta))
        }

        async fn unlink(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            let (parent, name) = (parent.to_os_string(), name.to_os_string());
            self.blocking(move |fs| fs.unlink(&parent, &name)).await
        }

        async fn rmdir(&self, _req: Request, parent: &OsStr, name: &OsStr) -> fuse3::Result<()> {
            let (parent, name) = (parent.to_os_string(), name.to_os_string());
            self.blocking(move |fs| fs.rmdir(&parent, &name)).await
        }

        async fn rename(
            &self,
            _req: Request,
            origin_parent: &OsStr,
            origin_name: &OsStr,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<()> {
            let (from_parent, from_name) = (origin_parent.to_os_string(), origin_name.to_os_string());
            let (to_parent, to_name) = (parent.to_os_string(), name.to_os_string());
            self.blocking(move |fs| fs.rename(&from_parent, &from_name, &to_parent, &to_name))
                .await
        }

        async fn link(
            &self,
            _req: Request,
            path: &OsStr,
            new_parent: &OsStr,
            new_name: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            let (path, new_parent, new_name) = (
                path.to_os_string(),
                new_parent.to_os_string(),
                new_name.to_os_string(),
            );
            let meta = self
                .blocking(move |fs| fs.link(&path, &new_parent, &new_name))
                .await?;
            Ok(self.entry(&meta))
        }

        async fn open(&self, _req: Request, path: &OsStr, flags: u32) -> fuse3::Result<ReplyOpen> {
            let path = path.to_os_string();
            let fh = self
                .blocking(move |fs| fs.open(&path, flags as i32))
                .await?;
            Ok(ReplyOpen { fh, flags: 0 })
        }

        async fn create(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
            mode: u32,
            flags: u32,
        ) -> fuse3::Result<ReplyCreated> {
            let (parent, name) = (parent.to_os_string(), name.to_os_string());
            let (fh, meta) = self
                .blocking(move |fs| fs.create(&parent, &name, mode, flags as i32))
                .await?;
            Ok(ReplyCreated {
                ttl: self.ttl,
                attr: file_attr(&meta),
                generation: 0,
                fh,
                flags: 0,
            })
        }

        async fn read(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            size: u32,
        ) -> fuse3::Result<ReplyData> {
            let data = self.blocking(move |fs| fs.read(fh, offset, size)).await?;
            Ok(ReplyData {
                data: Bytes::from(data),
            })
        }

        #[allow(clippy::too_many_arguments)]
        async fn write(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            data: &[u8],
            _write_flags: u32,
            _flags: u32,
        ) -> fuse3::Result<ReplyWrite> {
            let data = data.to_vec();
            let written = self
                .blocking(move |fs| fs.write(fh, offset, &data))
                .await?;
            Ok(ReplyWrite {
                written: written as u32,
            })
        }

        async fn flush(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<()> {
            self.blocking(move |fs| fs.flush(fh)).await
        }

        async fn fsync(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            datasync: bool,
        ) -> fuse3::Result<()> {
            self.blocking(move |fs| fs.fsync(fh, datasync)).await
        }

        async fn release(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _flags: u32,
            _lock_owner: u64,
            _flush: bool,
        ) -> fuse3::Result<()> {
            self.blocking(move |fs| fs.release(fh)).await
        }

        async fn fallocate(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            length: u64,
            mode: u32,
        ) -> fuse3::Result<()> {
            self.blocking(move |fs| fs.fallocate(fh, offset, length, mode as i32))
                .await
        }

        async fn access(&self, _req: Request, path: &OsStr, mask: u32) -> fuse3::Result<()> {
            let path = path.to_os_string();
            self.blocking(move |fs| fs.access(&path, mask as i32)).await
        }

        async fn statfs(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyStatFs> {
            let path = path.to_os_string();
            let st = self.blocking(move |fs| fs.statfs(&path)).await?;
            Ok(ReplyStatFs {
                blocks: st.blocks,
                bfree: st.bfree,
                bavail: st.bavail,
                files: st.files,
                ffree: st.ffree,
                bsize: st.bsize,
                namelen: st.namelen,
                frsize: st.frsize,
            })
        }

        // ── Extended attributes ───────────────────────────────────────────────

        async fn setxattr(
            &self,
            _req: Request,
            path: &OsStr,
            name: &OsStr,
            value: &[u8],
            flags: u32,
            _position: u32,
        ) -> fuse3::Result<()> {
            let (path, name, value) = (path.to_os_string(), name.to_os_string(), value.to_vec());
            self.blocking(move |fs| fs.setxattr(&path, &name, &value, flags as i32))
                .await
        }

        async fn getxattr(
            &self,
            _req: Request,
            path: &OsStr,
            name: &OsStr,
            size: u32,
        ) -> fuse3::Result<ReplyXAttr> {
            let (path, name) = (path.to_os_string(), name.to_os_string());
            let reply = self
                .blocking(move |fs| fs.getxattr(&path, &name, size))
                .await?;
            Ok(xattr_reply(reply))
        }

        async fn listxattr(
            &self,
            _req: Request,
            path: &OsStr,
            size: u32,
        ) -> fuse3::Result<ReplyXAttr> {
            let path = path.to_os_string();
            let reply = self.blocking(move |fs| fs.listxattr(&path, size)).await?;
            Ok(xattr_reply(reply))
        }

        async fn removexattr(
            &self,
            _req: Request,
            path: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<()> {
            let (path, name) = (path.to_os_string(), name.to_os_string());
            self.blocking(move |fs| fs.removexattr(&path, &name)).await
        }

        // ── Directories ───────────────────────────────────────────────────────

        // Directory entry stream types
        type DirEntryStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
        where
            Self: 'a;

        type DirEntryPlusStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
        where
            Self: 'a;

        async fn opendir(
            &self,
            _req: Request,
            _path: &OsStr,
            _flags: u32,
        ) -> fuse3::Result<ReplyOpen> {
            Ok(ReplyOpen { fh: 0, flags: 0 })
        }

        async fn readdir<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: i64,
        ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
            let dir = path.to_os_string();
            let children = self.blocking(move |fs| fs.readdir(&dir)).await?;

            let children = children
                .into_iter()
                .map(|e| (OsString::from(e.name), e.kind));
            let offset = u64::try_from(offset).unwrap_or(0);

            let entries: Vec<fuse3::Result<DirectoryEntry>> =
                entries_after(EntryKind::Directory, EntryKind::Directory, children, offset)
                    .into_iter()
                    .map(|(entry_offset, name, kind)| {
                        Ok(DirectoryEntry {
                            kind: file_type(kind),
                            name,
                            offset: entry_offset as i64,
                        })
                    })
                    .collect();

            Ok(ReplyDirectory {
                entries: stream::iter(entries),
            })
        }

        async fn readdirplus<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
            let dir = path.to_os_string();
            let (dot, dotdot, children) = self
                .blocking(move |fs| {
                    let parent = Path::new(&dir).parent().unwrap_or(Path::new("/"));
                    let dot = fs.getattr(&dir)?;
                    let dotdot = fs.getattr(parent.as_os_str())?;
                    Ok((dot, dotdot, fs.readdir_plus(&dir)?))
                })
                .await?;

            let children = children
                .into_iter()
                .map(|(e, meta)| (OsString::from(e.name), meta));

            let entries: Vec<fuse3::Result<DirectoryEntryPlus>> =
                entries_after(dot, dotdot, children, offset)
                    .into_iter()
                    .map(|(entry_offset, name, meta)| {
                        Ok(DirectoryEntryPlus {
                            kind: file_type(EntryKind::from_file_type(meta.file_type())),
                            name,
                            offset: entry_offset as i64,
                            attr: file_attr(&meta),
                            entry_ttl: self.ttl,
                            attr_ttl: self.ttl,
                        })
                    })
                    .collect();

            Ok(ReplyDirectoryPlus {
                entries: stream::iter(entries),
            })
        }
    }

    fn xattr_reply(reply: XattrReply) -> ReplyXAttr {
        match reply {
            XattrReply::Size(n) => ReplyXAttr::Size(n),
            XattrReply::Data(data) => ReplyXAttr::Data(Bytes::from(data)),
        }
    }

    // ── Public mount API ──────────────────────────────────────────────────────

    /// Mount configuration
    pub struct MountConfig {
        /// Encrypted storage root
        pub root: PathBuf,
        /// Where the plaintext view appears
        pub mountpoint: PathBuf,
        pub password: SecretString,
        pub fs_name: String,
        pub attr_ttl: Duration,
        pub max_write: u32,
        pub read_only: bool,
        pub allow_other: bool,
    }

    /// Unlock the storage root, mount, and block until unmounted.
    ///
    /// Call from an async context. A wrong password fails before anything is
    /// mounted. Returns when the filesystem is unmounted (e.g. via
    /// `fusermount3 -u <mountpoint>` or `aesfs unmount`).
    pub async fn mount(cfg: MountConfig) -> AesfsResult<()> {
        let translator = volume::unlock(&cfg.root, &cfg.password)?;

        let mountpoint = cfg.mountpoint.canonicalize()?;
        if mountpoint.starts_with(translator.root()) {
            return Err(AesfsError::Config(format!(
                "mountpoint {} is inside the storage root",
                mountpoint.display()
            )));
        }

        let fs = AesFs::new(Passthrough::new(translator), cfg.attr_ttl, cfg.max_write);

        let mut opts = MountOptions::default();
        opts.fs_name(cfg.fs_name.as_str());
        opts.read_only(cfg.read_only);
        if cfg.allow_other {
            opts.allow_other(true);
        }

        info!(
            root = %cfg.root.display(),
            mountpoint = %mountpoint.display(),
            "mounting aesfs (unprivileged via fusermount3)"
        );

        let handle = Session::new(opts)
            .mount_with_unprivileged(fs, &mountpoint)
            .await?;

        handle.await?;
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_system_time_conversion() {
            assert_eq!(system_time(0, 0), UNIX_EPOCH);
            assert_eq!(
                system_time(10, 5),
                UNIX_EPOCH + Duration::from_secs(10) + Duration::from_nanos(5)
            );
            assert_eq!(
                system_time(-2, 500_000_000),
                UNIX_EPOCH - Duration::from_millis(1500)
            );
        }

        #[test]
        fn test_extreme_times_do_not_panic() {
            assert!(system_time(i64::MIN, 999_999_999) <= UNIX_EPOCH);
            assert!(system_time(i64::MAX, 999_999_999) >= UNIX_EPOCH);
        }

        #[test]
        fn test_timestamp_conversion() {
            let t = Timestamp {
                sec: 1_000_000_000,
                nsec: 250,
            };
            assert_eq!(
                from_timestamp(t),
                UNIX_EPOCH + Duration::new(1_000_000_000, 250)
            );
            let before_epoch = Timestamp {
                sec: -2,
                nsec: 500_000_000,
            };
            assert_eq!(
                from_timestamp(before_epoch),
                UNIX_EPOCH - Duration::from_millis(1500)
            );
            let round_trip = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
            assert_eq!(from_timestamp(Timestamp::from(round_trip)), round_trip);
        }

        fn names(entries: &[(u64, OsString, ())]) -> Vec<(u64, &str)> {
            entries
                .iter()
                .map(|(off, name, _)| (*off, name.to_str().unwrap()))
                .collect()
        }

        fn listing(offset: u64) -> Vec<(u64, OsString, ())> {
            let children = ["a", "b", "c"].map(|n| (OsString::from(n), ()));
            entries_after((), (), children, offset)
        }

        #[test]
        fn test_entries_from_start() {
            assert_eq!(
                names(&listing(0)),
                vec![(1, "."), (2, ".."), (3, "a"), (4, "b"), (5, "c")]
            );
        }

        #[test]
        fn test_entries_resume_after_dot_entries() {
            assert_eq!(names(&listing(2)), vec![(3, "a"), (4, "b"), (5, "c")]);
            assert_eq!(names(&listing(4)), vec![(5, "c")]);
        }

        #[test]
        fn test_entries_exhausted() {
            assert!(listing(5).is_empty());
            assert!(listing(u64::MAX).is_empty());
        }

        fn passthrough() -> (tempfile::TempDir, Passthrough) {
            use aesfs_crypto::{DerivedKey, NameCipher};

            let dir = tempfile::tempdir().unwrap();
            let cipher = NameCipher::new(&DerivedKey::from_bytes([0x55u8; 32]));
            let translator =
                crate::translate::PathTranslator::new(dir.path().to_path_buf(), cipher);
            (dir, Passthrough::new(translator))
        }

        fn create(fs: &Passthrough, name: &str, data: &[u8]) {
            let (fh, _) = fs
                .create(OsStr::new("/"), OsStr::new(name), 0o644, libc::O_WRONLY)
                .unwrap();
            fs.write(fh, 0, data).unwrap();
            fs.release(fh).unwrap();
        }

        #[test]
        fn test_setattr_times_survive_truncate_and_chmod() {
            let (_dir, fs) = passthrough();
            create(&fs, "f", b"0123456789");

            let changes = AttrChanges {
                mode: Some(0o600),
                size: Some(3),
                atime: Some(from_timestamp(Timestamp {
                    sec: 1_200_000_000,
                    nsec: 0,
                })),
                mtime: Some(from_timestamp(Timestamp {
                    sec: 1_000_000_000,
                    nsec: 0,
                })),
                ..AttrChanges::default()
            };
            let meta = changes.apply(&fs, Some(OsStr::new("/f")), None).unwrap();

            assert_eq!(meta.len(), 3);
            assert_eq!(meta.mode() & 0o777, 0o600);
            assert_eq!(meta.atime(), 1_200_000_000);
            assert_eq!(meta.mtime(), 1_000_000_000);
        }

        #[test]
        fn test_setattr_size_through_handle() {
            let (_dir, fs) = passthrough();
            create(&fs, "h", b"abcdef");
            let fh = fs.open(OsStr::new("/h"), libc::O_RDWR).unwrap();

            let changes = AttrChanges {
                size: Some(2),
                ..AttrChanges::default()
            };
            let meta = changes.apply(&fs, None, Some(fh)).unwrap();
            assert_eq!(meta.len(), 2);
            fs.release(fh).unwrap();
        }

        #[test]
        fn test_setattr_without_path_is_enoent() {
            let (_dir, fs) = passthrough();
            let changes = AttrChanges {
                mode: Some(0o644),
                ..AttrChanges::default()
            };
            let err = changes.apply(&fs, None, None).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        }

        #[test]
        fn test_file_type_mapping() {
            assert!(matches!(file_type(EntryKind::File), FileType::RegularFile));
            assert!(matches!(file_type(EntryKind::Directory), FileType::Directory));
            assert!(matches!(file_type(EntryKind::Symlink), FileType::Symlink));
        }

        #[test]
        fn test_file_attr_from_metadata() {
            let dir = tempfile::tempdir().unwrap();
            let file = dir.path().join("f");
            std::fs::write(&file, b"abc").unwrap();
            let meta = std::fs::metadata(&file).unwrap();

            let attr = file_attr(&meta);
            assert_eq!(attr.size, 3);
            assert!(matches!(attr.kind, FileType::RegularFile));
            assert_eq!(attr.perm as u32, meta.mode() & 0o7777);
            assert_eq!(attr.uid, meta.uid());
        }
    }
}

#[cfg(feature = "fuse")]
pub use inner::{mount, AesFs, MountConfig};

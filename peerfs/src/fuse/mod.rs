// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FUSE adapter.
//!
//! `PeerFs` translates rfuse3 requests into tree operations and tree outcomes back into
//! replies and errno values. It holds the tree, the seed it is populated from, and the
//! access gate located once population is done; all other logic lives in `vfs`.
//!
//! Verbs without a tree operation (write, unlink, rmdir, rename, and the rfuse3
//! defaults such as symlink, link, mknod and xattrs) reply ENOSYS.
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::Result as FuseResult;
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};

use crate::error::FsError;
use crate::manifest::Manifest;
use crate::vfs::{AccessGate, AttrChange, Attributes, FileKind, ShadowConfig, Tree, TreeBuilder};

const TTL: Duration = Duration::from_secs(1);

static DENY_ALL: AccessGate = AccessGate::deny_all();

/// One listing entry of a directory, `.` and `..` included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileKind,
    pub name: String,
}

pub struct PeerFs {
    tree: Arc<Tree>,
    manifest: Manifest,
    shadow: ShadowConfig,
    gate: OnceLock<AccessGate>,
    populating: Mutex<()>,
}

impl PeerFs {
    pub fn new(manifest: Manifest, shadow: ShadowConfig) -> Self {
        Self {
            tree: Arc::new(Tree::new()),
            manifest,
            shadow,
            gate: OnceLock::new(),
            populating: Mutex::new(()),
        }
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    /// Build the tree from the seed and locate the access gate.
    ///
    /// Only the first successful call builds; later calls return the same gate.
    pub fn populate_on_mount(&self) -> Result<&AccessGate, FsError> {
        if let Some(gate) = self.gate.get() {
            return Ok(gate);
        }
        let _guard = self.populating.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = self.gate.get() {
            return Ok(gate);
        }
        TreeBuilder::new(&self.tree).build(&self.manifest, &self.shadow)?;
        Ok(self
            .gate
            .get_or_init(|| AccessGate::locate(&self.tree, &self.shadow.name)))
    }

    pub fn is_populated(&self) -> bool {
        self.gate.get().is_some()
    }

    // Before population nothing is admitted.
    fn gate(&self) -> &AccessGate {
        self.gate.get().unwrap_or(&DENY_ALL)
    }

    pub fn lookup_child(&self, parent: u64, name: &str) -> Result<Attributes, FsError> {
        Ok(self.tree.lookup(parent, name)?.attributes())
    }

    pub fn attributes(&self, ino: u64) -> Result<Attributes, FsError> {
        Ok(self.tree.node(ino)?.attributes())
    }

    pub fn set_attributes(&self, ino: u64, change: &AttrChange) -> Result<Attributes, FsError> {
        Ok(self.tree.node(ino)?.set_attributes(change))
    }

    pub fn open_file(&self, ino: u64) -> Result<(), FsError> {
        self.tree.node(ino)?.open()
    }

    pub fn open_dir(&self, ino: u64) -> Result<(), FsError> {
        self.tree.node(ino)?.as_dir().map(|_| ())
    }

    /// The whole content of `ino`, cut to at most `size` bytes so the reply never
    /// exceeds the kernel's buffer. `offset` is accepted and ignored: reads always
    /// start at byte zero.
    pub fn read_file(&self, ino: u64, offset: u64, size: u32) -> Result<Bytes, FsError> {
        if offset != 0 {
            trace!("read on ino {ino} at offset {offset} served from the start");
        }
        let data = self.tree.node(ino)?.read()?;
        let len = data.len().min(size as usize);
        Ok(data.slice(..len))
    }

    pub fn make_dir(&self, parent: u64, name: &str) -> Result<Attributes, FsError> {
        let dir = self.tree.node(parent)?;
        Ok(self.tree.mkdir(&dir, name, self.gate())?.attributes())
    }

    pub fn create_file(&self, parent: u64, name: &str) -> Result<Attributes, FsError> {
        let dir = self.tree.node(parent)?;
        Ok(self.tree.create(&dir, name, self.gate())?.attributes())
    }

    pub fn list_dir(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let node = self.tree.node(ino)?;
        let children = node.as_dir()?.entries();
        let mut all = Vec::with_capacity(children.len() + 2);
        all.push(DirEntry {
            ino,
            kind: FileKind::Directory,
            name: ".".into(),
        });
        all.push(DirEntry {
            ino: node.parent(),
            kind: FileKind::Directory,
            name: "..".into(),
        });
        all.extend(children.into_iter().map(|(name, child)| DirEntry {
            ino: child.ino(),
            kind: child.kind(),
            name,
        }));
        Ok(all)
    }

    fn unsupported<T>(&self, op: &'static str) -> FuseResult<T> {
        debug!("{op}: not supported");
        Err(FsError::NotSupported(op).into())
    }
}

impl Filesystem for PeerFs {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        self.populate_on_mount().map_err(|e| {
            error!("populate on mount failed: {e}");
            libc::EIO
        })?;
        let max_write = NonZeroU32::new(1024 * 1024).ok_or(libc::EINVAL)?;
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        info!("peerfs session destroyed");
    }

    async fn lookup(&self, req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let attr = self.lookup_child(parent, entry_name(name)?)?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(&attr, req.uid, req.gid),
            generation: 0,
        })
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        self.open_file(ino)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        self.open_dir(ino)?;
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = self.read_file(ino, offset, size)?;
        Ok(ReplyData { data })
    }

    async fn write(
        &self,
        _req: Request,
        _ino: u64,
        _fh: u64,
        _offset: u64,
        _data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        self.unsupported("write")
    }

    async fn getattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let attr = self.attributes(ino)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(&attr, req.uid, req.gid),
        })
    }

    async fn setattr(
        &self,
        req: Request,
        ino: u64,
        _fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let change = AttrChange {
            size: set_attr.size,
            mode: set_attr.mode,
        };
        let attr = self.set_attributes(ino, &change)?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(&attr, req.uid, req.gid),
        })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let entries: Vec<_> = self
            .list_dir(ino)?
            .into_iter()
            .enumerate()
            .map(|(i, e)| DirectoryEntry {
                inode: e.ino,
                kind: kind_to_fuse(e.kind),
                name: OsString::from(e.name),
                offset: i as i64 + 1,
            })
            .skip(offset.max(0) as usize)
            .collect();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let mut entries = Vec::new();
        for (i, e) in self
            .list_dir(ino)?
            .into_iter()
            .enumerate()
            .skip(offset as usize)
        {
            let attr = self.attributes(e.ino)?;
            entries.push(DirectoryEntryPlus {
                inode: e.ino,
                generation: 0,
                kind: kind_to_fuse(e.kind),
                name: OsString::from(e.name),
                offset: i as i64 + 1,
                attr: to_fuse_attr(&attr, req.uid, req.gid),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }
        let boxed: Self::DirEntryPlusStream<'a> =
            Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: self.tree.len() as u64,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let attr = self.make_dir(parent, entry_name(name)?)?;
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(&attr, req.uid, req.gid),
            generation: 0,
        })
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let attr = self.create_file(parent, entry_name(name)?)?;
        Ok(ReplyCreated {
            ttl: TTL,
            attr: to_fuse_attr(&attr, req.uid, req.gid),
            generation: 0,
            fh: 0,
            flags: 0,
        })
    }

    async fn unlink(&self, _req: Request, _parent: u64, _name: &OsStr) -> FuseResult<()> {
        self.unsupported("unlink")
    }

    async fn rmdir(&self, _req: Request, _parent: u64, _name: &OsStr) -> FuseResult<()> {
        self.unsupported("rmdir")
    }

    async fn rename(
        &self,
        _req: Request,
        _parent: u64,
        _name: &OsStr,
        _new_parent: u64,
        _new_name: &OsStr,
    ) -> FuseResult<()> {
        self.unsupported("rename")
    }

    // Nodes live until unmount, so handles and lookup counts need no bookkeeping.
    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn flush(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _lock_owner: u64,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsync(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn forget(&self, _req: Request, _inode: u64, _nlookup: u64) {}

    async fn batch_forget(&self, _req: Request, _inodes: &[(u64, u64)]) {}

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

// Tree names are UTF-8. A lossy conversion would fold distinct byte names onto one
// node, so anything else is refused.
fn entry_name(name: &OsStr) -> FuseResult<&str> {
    name.to_str().ok_or_else(|| {
        debug!("rejecting non UTF-8 name {name:?}");
        libc::EINVAL.into()
    })
}

fn kind_to_fuse(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Directory => FuseFileType::Directory,
        FileKind::File => FuseFileType::RegularFile,
    }
}

fn to_fuse_attr(attr: &Attributes, uid: u32, gid: u32) -> FileAttr {
    let mtime = Timestamp::from(attr.modified_at);
    let (perm, nlink) = match attr.kind {
        FileKind::Directory => (0o755, 2),
        FileKind::File => (0o644, 1),
    };
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        #[cfg(target_os = "macos")]
        crtime: mtime,
        kind: kind_to_fuse(attr.kind),
        perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: 4096,
    }
}


#[cfg(all(test, target_os = "linux"))]
mod mount_tests {
    use super::*;
    use crate::fuse::mount::{MountPoint, mount_peerfs};
    use std::fs;
    use std::time::Duration as StdDuration;

    // Real FUSE round trip, enabled with PEERFS_FUSE_TEST=1.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_mount_and_basic_ops() {
        if std::env::var("PEERFS_FUSE_TEST").ok().as_deref() != Some("1") {
            eprintln!("skip fuse mount test: set PEERFS_FUSE_TEST=1 to enable");
            return;
        }

        let mnt = MountPoint::temporary().expect("tmp mount");
        let mnt_path = mnt.path().to_path_buf();
        let peerfs = PeerFs::new(Manifest::builtin(), ShadowConfig::default());
        let handle = match mount_peerfs(peerfs, &mnt_path, true).await {
            Ok(h) => h,
            Err(e) => {
                eprintln!("skip fuse test: mount failed: {e}");
                return;
            }
        };
        tokio::time::sleep(StdDuration::from_millis(500)).await;

        let root = mnt_path.clone();
        tokio::task::spawn_blocking(move || {
            assert_eq!(fs::read(root.join("file")).expect("read file"), b"content");
            assert_eq!(
                fs::read(root.join("subdir/other-file")).expect("read nested"),
                b"other-content"
            );
            let names: Vec<_> = fs::read_dir(&root)
                .expect("readdir")
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            assert!(names.iter().any(|n| n == "subdir"));

            fs::File::create(root.join("user1")).expect("admitted create");
            let denied = fs::File::create(root.join("user3")).unwrap_err();
            assert_eq!(denied.raw_os_error(), Some(libc::EACCES));

            fs::create_dir(root.join("newdir")).expect("mkdir");
        })
        .await
        .expect("blocking ops");

        if let Err(e) = handle.unmount().await {
            eprintln!("unmount error: {e}");
        }
    }
}

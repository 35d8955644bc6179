// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mount point allocation and session startup.
//!
//! Linux only. Unprivileged mounts go through fusermount3; the rest is rfuse3's raw
//! `Session`.

use std::path::{Path, PathBuf};

use rfuse3::MountOptions;
use tempfile::TempDir;

use super::PeerFs;
use crate::error::SetupError;

/// A directory to mount on. Temporary ones are removed when dropped, so keep the value
/// alive until the session has been unmounted.
#[derive(Debug)]
pub struct MountPoint {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl MountPoint {
    /// Allocate a fresh, empty directory under the system temp dir.
    pub fn temporary() -> Result<Self, SetupError> {
        let temp = tempfile::Builder::new()
            .prefix("peerfs-")
            .tempdir()
            .map_err(SetupError::MountPoint)?;
        Ok(Self {
            path: temp.path().to_path_buf(),
            temp: Some(temp),
        })
    }

    /// Use `path`, creating it if needed.
    pub fn existing(path: impl Into<PathBuf>) -> Result<Self, SetupError> {
        let path = path.into();
        std::fs::create_dir_all(&path).map_err(SetupError::MountPoint)?;
        Ok(Self { path, temp: None })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// Build default mount options for peerfs.
fn default_mount_options() -> MountOptions {
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    let mut mo = MountOptions::default();
    mo.fs_name("peerfs");
    // no allow_other: only the mounting user sees the tree
    mo.force_readdir_plus(true).uid(uid).gid(gid);
    mo
}

/// Populate `fs` and mount it on `mount_point`.
///
/// Population happens before the session starts so a bad seed aborts startup instead
/// of failing the kernel's INIT.
#[cfg(target_os = "linux")]
pub async fn mount_peerfs(
    fs: PeerFs,
    mount_point: impl AsRef<Path>,
    unprivileged: bool,
) -> Result<rfuse3::raw::MountHandle, SetupError> {
    let mount_point = mount_point.as_ref();
    fs.populate_on_mount()?;

    let session = rfuse3::raw::Session::new(default_mount_options());
    let mounted = if unprivileged {
        // requires fusermount3 in PATH
        session.mount_with_unprivileged(fs, mount_point).await
    } else {
        session.mount(fs, mount_point).await
    };
    let handle = mounted.map_err(|source| SetupError::Mount {
        path: mount_point.to_path_buf(),
        source,
    })?;
    info!(
        "mounted peerfs on {} ({})",
        mount_point.display(),
        if unprivileged { "unprivileged" } else { "privileged" }
    );
    Ok(handle)
}

/// FUSE is unavailable off Linux.
#[cfg(not(target_os = "linux"))]
pub async fn mount_peerfs(
    _fs: PeerFs,
    mount_point: impl AsRef<Path>,
    _unprivileged: bool,
) -> Result<rfuse3::raw::MountHandle, SetupError> {
    Err(SetupError::Mount {
        path: mount_point.as_ref().to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "FUSE mount is only supported on Linux in this build",
        ),
    })
}

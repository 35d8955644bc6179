// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Outcome of a tree operation that did not succeed.
///
/// The adapter is the only place these become kernel error codes, see [`FsError::errno`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("permission denied: {0:?} is not admitted by the shadow directory")]
    PermissionDenied(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("no such entry: {0:?}")]
    NotFound(String),

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("entry already exists: {0:?}")]
    Exists(String),
}

impl FsError {
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::NotSupported(_) => libc::ENOSYS,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::Exists(_) => libc::EEXIST,
        }
    }
}

impl From<FsError> for rfuse3::Errno {
    fn from(err: FsError) -> Self {
        err.errno().into()
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed manifest path {0:?}")]
    MalformedPath(String),

    #[error("manifest path {0:?} appears more than once")]
    DuplicatePath(String),

    #[error("manifest path {file:?} is a file but {dir:?} needs it as a directory")]
    Conflict { file: String, dir: String },

    #[error("failed to read manifest {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Fatal errors raised while bringing the mount up.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid name {0:?}: must be non-empty, contain no '/' and not be '.' or '..'")]
    InvalidName(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to allocate mount point: {0}")]
    MountPoint(#[source] io::Error),

    #[error("failed to populate tree: {0}")]
    Populate(#[from] FsError),

    #[error("mount on {path:?} failed: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

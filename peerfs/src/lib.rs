// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! peerfs: a manifest-seeded in-memory file tree mounted over FUSE, where new files
//! may only be created under names admitted by a shadow directory.
#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod fuse;
pub mod manifest;
pub mod vfs;

pub use error::{FsError, ManifestError, SetupError};
pub use fuse::PeerFs;
pub use manifest::Manifest;

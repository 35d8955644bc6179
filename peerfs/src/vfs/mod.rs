// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! VFS layer: the in-memory tree served over FUSE.
//!
//! - `node`: directory and file nodes with per-node locking
//! - `tree`: the rooted node graph, inode index and the `mkdir`/`create` operations
//! - `builder`: materializes a manifest into a tree at mount time
//! - `gate`: the shadow-directory allow-list consulted by `create`
pub mod builder;
pub mod gate;
pub mod node;
pub mod tree;

pub use builder::{BuildSummary, TreeBuilder};
pub use gate::{AccessGate, DEFAULT_SHADOW_DIR, ShadowConfig};
pub use node::{AttrChange, Attributes, Directory, File, FileKind, Node};
pub use tree::{ROOT_INO, Tree};

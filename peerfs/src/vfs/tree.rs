// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The live node graph of one mount.
//!
//! Directories own their children. The tree additionally keeps an inode index of weak
//! references so kernel inode numbers can be resolved without a second owner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::SystemTime;

use bytes::Bytes;

use super::gate::AccessGate;
use super::node::Node;
use crate::error::FsError;

/// Inode number of the root directory, fixed by the FUSE protocol.
pub const ROOT_INO: u64 = 1;

pub struct Tree {
    root: Arc<Node>,
    inodes: RwLock<HashMap<u64, Weak<Node>>>,
    next_ino: AtomicU64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        let root = Arc::new(Node::directory(ROOT_INO, ROOT_INO, SystemTime::now()));
        let mut inodes = HashMap::new();
        inodes.insert(ROOT_INO, Arc::downgrade(&root));
        Self {
            root,
            inodes: RwLock::new(inodes),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    /// Resolve an inode number handed out in an earlier reply.
    pub fn node(&self, ino: u64) -> Result<Arc<Node>, FsError> {
        self.inodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ino)
            .and_then(Weak::upgrade)
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    pub fn lookup(&self, parent: u64, name: &str) -> Result<Arc<Node>, FsError> {
        self.node(parent)?.lookup_child(name)
    }

    /// Walk a slash-separated path from the root. Empty components are ignored.
    pub fn resolve(&self, path: &str) -> Option<Arc<Node>> {
        path.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(self.root.clone(), |node, c| node.lookup_child(c).ok())
    }

    /// Number of nodes reachable through the inode index, root included.
    pub fn len(&self) -> usize {
        self.inodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idempotent directory creation. The shadow directory is frozen after mount.
    pub fn mkdir(&self, dir: &Node, name: &str, gate: &AccessGate) -> Result<Arc<Node>, FsError> {
        if gate.is_shadow(dir) {
            warn!("mkdir {name:?} denied: shadow directory is read-only");
            return Err(FsError::PermissionDenied(name.to_string()));
        }
        self.ensure_dir(dir, name, SystemTime::now())
    }

    /// Realize an empty file called `name` in `dir` if the gate admits the name.
    ///
    /// Concurrent calls for the same name all get the node made by the first one.
    pub fn create(&self, dir: &Node, name: &str, gate: &AccessGate) -> Result<Arc<Node>, FsError> {
        dir.as_dir()?;
        if !gate.is_permitted(name) {
            warn!("create {name:?} denied: not listed in the shadow directory");
            return Err(FsError::PermissionDenied(name.to_string()));
        }
        let (node, created) = self.ensure_file(dir, name, Bytes::new(), SystemTime::now())?;
        if created {
            info!("created {name:?} (ino {}) under ino {}", node.ino(), dir.ino());
        }
        Ok(node)
    }

    pub(crate) fn ensure_dir(
        &self,
        dir: &Node,
        name: &str,
        now: SystemTime,
    ) -> Result<Arc<Node>, FsError> {
        let (node, _) = dir.as_dir()?.get_or_insert_with(name, || {
            self.register(Node::directory(self.alloc_ino(), dir.ino(), now))
        });
        if !node.is_dir() {
            return Err(FsError::Exists(name.to_string()));
        }
        Ok(node)
    }

    pub(crate) fn ensure_file(
        &self,
        dir: &Node,
        name: &str,
        content: Bytes,
        now: SystemTime,
    ) -> Result<(Arc<Node>, bool), FsError> {
        let (node, created) = dir.as_dir()?.get_or_insert_with(name, || {
            self.register(Node::file(self.alloc_ino(), dir.ino(), content, now))
        });
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        Ok((node, created))
    }

    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, node: Node) -> Arc<Node> {
        let node = Arc::new(node);
        self.inodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.ino(), Arc::downgrade(&node));
        node
    }
}

// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree nodes.
//!
//! A node is either a directory or a regular file. Each directory guards its child map
//! with its own mutex and each file guards its content and mtime with another, so
//! structural changes and attribute reads never contend on a tree-wide lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::FsError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    File,
}

/// Point-in-time attributes of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub ino: u64,
    pub kind: FileKind,
    pub size: u64,
    pub modified_at: SystemTime,
}

/// Attribute changes requested by the kernel. Accepted but never applied.
#[derive(Clone, Debug, Default)]
pub struct AttrChange {
    pub size: Option<u64>,
    pub mode: Option<u32>,
}

impl AttrChange {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.mode.is_none()
    }
}

#[derive(Debug)]
pub struct Node {
    ino: u64,
    parent: u64,
    kind: NodeKind,
}

#[derive(Debug)]
enum NodeKind {
    Directory(Directory),
    File(File),
}

#[derive(Debug)]
pub struct Directory {
    children: Mutex<BTreeMap<String, Arc<Node>>>,
    modified_at: SystemTime,
}

#[derive(Debug)]
pub struct File {
    state: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    content: Bytes,
    modified_at: SystemTime,
}

// Every critical section leaves the guarded data consistent, so a poisoned lock is
// still safe to use.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    pub(crate) fn directory(ino: u64, parent: u64, modified_at: SystemTime) -> Self {
        Self {
            ino,
            parent,
            kind: NodeKind::Directory(Directory {
                children: Mutex::new(BTreeMap::new()),
                modified_at,
            }),
        }
    }

    pub(crate) fn file(ino: u64, parent: u64, content: Bytes, modified_at: SystemTime) -> Self {
        Self {
            ino,
            parent,
            kind: NodeKind::File(File {
                state: Mutex::new(FileState {
                    content,
                    modified_at,
                }),
            }),
        }
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Inode number of the parent directory. The root is its own parent.
    pub fn parent(&self) -> u64 {
        self.parent
    }

    pub fn kind(&self) -> FileKind {
        match self.kind {
            NodeKind::Directory(_) => FileKind::Directory,
            NodeKind::File(_) => FileKind::File,
        }
    }

    pub fn as_dir(&self) -> Result<&Directory, FsError> {
        match &self.kind {
            NodeKind::Directory(d) => Ok(d),
            NodeKind::File(_) => Err(FsError::NotADirectory),
        }
    }

    pub fn as_file(&self) -> Result<&File, FsError> {
        match &self.kind {
            NodeKind::File(f) => Ok(f),
            NodeKind::Directory(_) => Err(FsError::IsADirectory),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn lookup_child(&self, name: &str) -> Result<Arc<Node>, FsError> {
        self.as_dir()?
            .child(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Content is memory-resident, so opening allocates nothing.
    pub fn open(&self) -> Result<(), FsError> {
        self.as_file().map(|_| ())
    }

    /// Whole-object read: the full content buffer, whatever range the caller wanted.
    pub fn read(&self) -> Result<Bytes, FsError> {
        Ok(self.as_file()?.content())
    }

    pub fn attributes(&self) -> Attributes {
        let (size, modified_at) = match &self.kind {
            NodeKind::Directory(d) => (0, d.modified_at),
            NodeKind::File(f) => {
                let state = lock(&f.state);
                (state.content.len() as u64, state.modified_at)
            }
        };
        Attributes {
            ino: self.ino,
            kind: self.kind(),
            size,
            modified_at,
        }
    }

    /// Echo the current attributes; truncation and mode changes are not applied.
    pub fn set_attributes(&self, change: &AttrChange) -> Attributes {
        if !change.is_empty() {
            debug!("ignoring setattr on ino {}: {:?}", self.ino, change);
        }
        self.attributes()
    }
}

impl Directory {
    pub fn child(&self, name: &str) -> Option<Arc<Node>> {
        lock(&self.children).get(name).cloned()
    }

    /// Return the child called `name`, creating it with `make` when absent.
    ///
    /// The check and the insert happen under the directory lock, so racing callers
    /// converge on one node. The flag is true only for the caller that created it.
    pub fn get_or_insert_with<F>(&self, name: &str, make: F) -> (Arc<Node>, bool)
    where
        F: FnOnce() -> Arc<Node>,
    {
        let mut children = lock(&self.children);
        if let Some(existing) = children.get(name) {
            return (existing.clone(), false);
        }
        let node = make();
        children.insert(name.to_string(), node.clone());
        (node, true)
    }

    /// Snapshot of the children, ordered by name.
    pub fn entries(&self) -> Vec<(String, Arc<Node>)> {
        lock(&self.children)
            .iter()
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.children).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.children).is_empty()
    }
}

impl File {
    pub fn content(&self) -> Bytes {
        lock(&self.state).content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_file_attributes_and_read() {
        let f = Node::file(7, 1, Bytes::from_static(b"content"), at(42));
        let attr = f.attributes();
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.kind, FileKind::File);
        assert_eq!(attr.size, 7);
        assert_eq!(attr.modified_at, at(42));
        assert_eq!(f.read().unwrap().as_ref(), b"content");
        assert!(f.open().is_ok());
        assert_eq!(f.lookup_child("x").unwrap_err(), FsError::NotADirectory);
    }

    #[test]
    fn test_directory_rejects_file_ops() {
        let d = Node::directory(1, 1, at(1));
        assert_eq!(d.attributes().size, 0);
        assert_eq!(d.read().unwrap_err(), FsError::IsADirectory);
        assert_eq!(d.open().unwrap_err(), FsError::IsADirectory);
        assert_eq!(
            d.lookup_child("missing").unwrap_err(),
            FsError::NotFound("missing".into())
        );
    }

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let d = Node::directory(1, 1, at(1));
        let dir = d.as_dir().unwrap();
        let (first, created) =
            dir.get_or_insert_with("a", || Arc::new(Node::directory(2, 1, at(2))));
        assert!(created);
        let (second, created) = dir.get_or_insert_with("a", || unreachable!());
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_set_attributes_echoes() {
        let f = Node::file(3, 1, Bytes::from_static(b"abc"), at(5));
        let before = f.attributes();
        let after = f.set_attributes(&AttrChange {
            size: Some(0),
            mode: Some(0o600),
        });
        assert_eq!(before, after);
        assert_eq!(f.read().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_entries_sorted() {
        let d = Node::directory(1, 1, at(1));
        let dir = d.as_dir().unwrap();
        for (ino, name) in [(2, "b"), (3, "a"), (4, "c")] {
            dir.get_or_insert_with(name, || Arc::new(Node::file(ino, 1, Bytes::new(), at(1))));
        }
        let names: Vec<_> = dir.entries().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}

// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::SystemTime;

use bytes::Bytes;

use super::gate::ShadowConfig;
use super::tree::Tree;
use crate::error::FsError;
use crate::manifest::{Manifest, split_path};

/// Counts of what a build materialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub directories: usize,
    pub files: usize,
}

/// Materializes a manifest into a tree, creating intermediate directories on demand.
///
/// Directories are attached with get-or-insert semantics, so the resulting shape does
/// not depend on manifest order and shared prefixes yield a single directory.
pub struct TreeBuilder<'a> {
    tree: &'a Tree,
    now: SystemTime,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(tree: &'a Tree) -> Self {
        Self {
            tree,
            now: SystemTime::now(),
        }
    }

    pub fn build(
        &self,
        manifest: &Manifest,
        shadow: &ShadowConfig,
    ) -> Result<BuildSummary, FsError> {
        let before = self.tree.len();
        let mut files = 0;
        for (path, content) in manifest.iter() {
            if self.add_file(path, content.clone())? {
                files += 1;
            }
        }

        if !shadow.admitted.is_empty() {
            let dir = self.tree.ensure_dir(self.tree.root(), &shadow.name, self.now)?;
            for name in &shadow.admitted {
                let (_, created) = self.tree.ensure_file(&dir, name, Bytes::new(), self.now)?;
                if created {
                    debug!("admitted {name:?} into {:?}", shadow.name);
                    files += 1;
                }
            }
        }

        let summary = BuildSummary {
            directories: self.tree.len() - before - files,
            files,
        };
        info!(
            "tree populated: {} directories, {} files",
            summary.directories, summary.files
        );
        Ok(summary)
    }

    fn add_file(&self, path: &str, content: Bytes) -> Result<bool, FsError> {
        let (dirs, name) = split_path(path);
        let mut cur = self.tree.root().clone();
        for component in dirs {
            let existed = cur.as_dir()?.child(component).is_some();
            cur = self.tree.ensure_dir(&cur, component, self.now)?;
            if !existed {
                debug!("added directory {component} (ino {})", cur.ino());
            }
        }
        let (file, created) = self.tree.ensure_file(&cur, name, content, self.now)?;
        if created {
            debug!("added file {path} (ino {})", file.ino());
        }
        Ok(created)
    }
}

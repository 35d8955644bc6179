// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Create gate backed by a shadow directory.
//!
//! The names of the shadow directory's children are the only names `create` may
//! realize anywhere in the tree. The directory is an ordinary node, filled once at
//! mount time from the manifest and the admission list.

use std::sync::Arc;

use super::node::Node;
use super::tree::Tree;

pub const DEFAULT_SHADOW_DIR: &str = ".all";

/// Where the shadow directory lives and which extra names it admits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShadowConfig {
    pub name: String,
    pub admitted: Vec<String>,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SHADOW_DIR.to_string(),
            admitted: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AccessGate {
    shadow: Option<Arc<Node>>,
}

impl AccessGate {
    /// Find the shadow directory under the tree root. A missing shadow directory, or a
    /// file in its place, yields a gate that denies everything.
    pub fn locate(tree: &Tree, shadow_name: &str) -> Self {
        let shadow = tree
            .root()
            .lookup_child(shadow_name)
            .ok()
            .filter(|node| node.is_dir());
        if shadow.is_none() {
            warn!("shadow directory {shadow_name:?} not found, every create will be denied");
        }
        Self { shadow }
    }

    /// A gate that admits nothing.
    pub const fn deny_all() -> Self {
        Self { shadow: None }
    }

    pub fn is_permitted(&self, name: &str) -> bool {
        self.shadow
            .as_ref()
            .is_some_and(|shadow| shadow.lookup_child(name).is_ok())
    }

    pub fn is_shadow(&self, node: &Node) -> bool {
        self.shadow
            .as_ref()
            .is_some_and(|shadow| shadow.ino() == node.ino())
    }

    pub fn shadow(&self) -> Option<&Arc<Node>> {
        self.shadow.as_ref()
    }
}

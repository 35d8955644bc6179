// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static namespace manifest: slash-separated path to file content.
//!
//! A manifest is validated once when it is built and is read-only afterwards, so the
//! tree builder can rely on every path splitting into non-empty components and on no
//! path being used both as a file and as a directory.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::path::Path;

use bytes::Bytes;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::ManifestError;

/// Seed used when no manifest file is given.
const DEFAULT_ENTRIES: [(&str, &str); 4] = [
    ("file", "content"),
    (".all/user1", "test1"),
    (".all/user2", "test2"),
    ("subdir/other-file", "other-content"),
];

/// Content as written in a manifest file: a string, or an array of byte values for
/// content that is not UTF-8.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Binary(Vec<u8>),
}

impl From<RawContent> for Bytes {
    fn from(raw: RawContent) -> Self {
        match raw {
            RawContent::Text(s) => Bytes::from(s),
            RawContent::Binary(b) => Bytes::from(b),
        }
    }
}

/// Entries in document order. Repeated keys are kept so they can be rejected instead
/// of the last one silently winning.
struct RawManifest(Vec<(String, RawContent)>);

impl<'de> Deserialize<'de> for RawManifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawManifest;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of manifest paths to file content")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(RawManifest(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, Bytes>,
}

impl Manifest {
    /// Build a manifest, rejecting malformed, repeated or conflicting paths.
    pub fn new<I, P, C>(entries: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<Bytes>,
    {
        let mut map = BTreeMap::new();
        for (path, content) in entries {
            let path = path.into();
            validate_path(&path)?;
            match map.entry(path) {
                Entry::Occupied(e) => return Err(ManifestError::DuplicatePath(e.key().clone())),
                Entry::Vacant(e) => {
                    e.insert(content.into());
                }
            }
        }
        check_conflicts(&map)?;
        Ok(Self { entries: map })
    }

    /// Parse a JSON object of `"path": content` pairs, where content is a string or an
    /// array of bytes.
    pub fn from_json(data: &[u8]) -> Result<Self, ManifestError> {
        let RawManifest(raw) = serde_json::from_slice(data)?;
        Self::new(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn get(&self, path: &str) -> Option<&Bytes> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The built-in seed: two ordinary files and two admitted names under `.all`.
    pub fn builtin() -> Self {
        Self {
            entries: DEFAULT_ENTRIES
                .iter()
                .map(|(p, c)| (p.to_string(), Bytes::from_static(c.as_bytes())))
                .collect(),
        }
    }
}

/// Split a validated path into its directory components and final name.
pub fn split_path(path: &str) -> (Vec<&str>, &str) {
    let mut parts: Vec<&str> = path.split('/').collect();
    let name = parts.pop().unwrap_or_default();
    (parts, name)
}

fn validate_path(path: &str) -> Result<(), ManifestError> {
    let malformed = path.is_empty()
        || path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == "..");
    if malformed {
        return Err(ManifestError::MalformedPath(path.to_string()));
    }
    Ok(())
}

fn check_conflicts(map: &BTreeMap<String, Bytes>) -> Result<(), ManifestError> {
    for path in map.keys() {
        let (dirs, _) = split_path(path);
        let mut prefix = String::new();
        for component in dirs {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if map.contains_key(&prefix) {
                return Err(ManifestError::Conflict {
                    file: prefix,
                    dir: path.clone(),
                });
            }
        }
    }
    Ok(())
}

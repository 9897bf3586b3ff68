//! Represents files discovered under a web application's source tree.

use serde::Serialize;
use std::{
    collections::{BTreeMap, btree_map},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// A single file to be packaged, addressed by its canonical relative path.
///
/// `relative_path` is always POSIX-style (`/` separated), never absolute and
/// never carries a leading slash. `source` points at the bytes on local disk;
/// the content itself is only read when the archive is built.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct AssetEntry {
    /// Forward-slash path relative to the mapped root (e.g. `static/app.css`).
    pub relative_path: String,

    /// Location of the file bytes on local disk.
    pub source: PathBuf,

    /// Size observed when the entry was mapped.
    pub size_bytes: u64,
}

impl AssetEntry {
    pub fn new(relative_path: impl Into<String>, source: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: source.into(),
            size_bytes,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Error)]
#[error("asset path `{0}` appears more than once")]
pub struct DuplicateAsset(pub String);

/// Immutable set of assets keyed by relative path.
///
/// Backed by a `BTreeMap`, so iteration is always lexicographic regardless of
/// the order entries were discovered in.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetMap {
    entries: BTreeMap<String, AssetEntry>,
}

impl AssetMap {
    /// Build a map from entries, rejecting repeated relative paths.
    pub fn new(entries: impl IntoIterator<Item = AssetEntry>) -> Result<Self, DuplicateAsset> {
        let mut map = BTreeMap::new();
        for entry in entries {
            match map.entry(entry.relative_path.clone()) {
                btree_map::Entry::Occupied(occupied) => {
                    return Err(DuplicateAsset(occupied.key().clone()));
                }
                btree_map::Entry::Vacant(vacant) => {
                    vacant.insert(entry);
                }
            }
        }
        Ok(Self { entries: map })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&AssetEntry> {
        self.entries.get(relative_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetEntry> {
        self.entries.values()
    }

    /// Sum of all mapped file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

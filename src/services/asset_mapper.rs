//! Walks a source tree and maps every regular file to its canonical,
//! forward-slash relative path.

use crate::{
    errors::{PublishError, PublishResult},
    models::asset::{AssetEntry, AssetMap},
};
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Component, Path},
};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Build an `AssetMap` of every regular file under `root`.
///
/// Symlinks are followed, but anything that resolves outside `root` is
/// skipped, and so are dangling links and link cycles. Any other unreadable
/// entry aborts the whole walk.
pub fn map_assets(root: &Path) -> PublishResult<AssetMap> {
    let canonical_root = fs::canonicalize(root).map_err(|e| PublishError::io(root, e))?;
    if !canonical_root.is_dir() {
        return Err(PublishError::io(
            root,
            io::Error::new(ErrorKind::NotADirectory, "asset root is not a directory"),
        ));
    }

    let mut entries = Vec::new();
    let walker = WalkDir::new(&canonical_root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| stays_under(entry, &canonical_root));
    for item in walker {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                if let Some(path) = skippable(&err) {
                    warn!("skipping {}: {}", path.display(), err);
                    continue;
                }
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| canonical_root.clone());
                return Err(PublishError::io(path, err.into()));
            }
        };
        if !item.file_type().is_file() {
            continue;
        }

        let path = item.path();
        let resolved = fs::canonicalize(path).map_err(|e| PublishError::io(path, e))?;
        if !resolved.starts_with(&canonical_root) {
            warn!(
                "skipping {} which resolves outside {}",
                path.display(),
                canonical_root.display()
            );
            continue;
        }

        let metadata = fs::metadata(&resolved).map_err(|e| PublishError::io(path, e))?;
        let relative = path
            .strip_prefix(&canonical_root)
            .map_err(|_| {
                PublishError::io(
                    path,
                    io::Error::new(ErrorKind::InvalidInput, "entry is not under the asset root"),
                )
            })?;
        let relative_path = to_posix(relative).map_err(|e| PublishError::io(path, e))?;

        debug!("mapped {} ({} bytes)", relative_path, metadata.len());
        entries.push(AssetEntry::new(relative_path, resolved, metadata.len()));
    }

    let map = AssetMap::new(entries).map_err(|dup| {
        PublishError::io(
            root,
            io::Error::new(ErrorKind::AlreadyExists, dup.to_string()),
        )
    })?;
    info!(
        "mapped {} assets ({} bytes) under {}",
        map.len(),
        map.total_bytes(),
        root.display()
    );
    Ok(map)
}

/// Refuse to descend into linked directories that live outside `root`.
fn stays_under(entry: &DirEntry, root: &Path) -> bool {
    if !entry.path_is_symlink() || !entry.file_type().is_dir() {
        return true;
    }
    match fs::canonicalize(entry.path()) {
        Ok(target) if !target.starts_with(root) => {
            warn!(
                "not descending into {} which resolves outside {}",
                entry.path().display(),
                root.display()
            );
            false
        }
        _ => true,
    }
}

/// Path of a walk error that should not abort mapping: a link cycle, or a
/// symlink whose target does not exist.
fn skippable(err: &walkdir::Error) -> Option<&Path> {
    let path = err.path()?;
    if err.loop_ancestor().is_some() {
        return Some(path);
    }
    let is_link = fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    let dangling = matches!(
        fs::metadata(path),
        Err(ref e) if e.kind() == ErrorKind::NotFound
    );
    (is_link && dangling).then_some(path)
}

/// Join the normal components of `relative` with `/`.
///
/// Host separators never leak into the result, and anything other than plain
/// names (`..`, roots, prefixes) is refused.
fn to_posix(relative: &Path) -> io::Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    io::Error::new(ErrorKind::InvalidData, "path is not valid UTF-8")
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    "path escapes the asset root",
                ));
            }
        }
    }
    if parts.is_empty() {
        return Err(io::Error::new(ErrorKind::InvalidInput, "empty relative path"));
    }
    Ok(parts.join("/"))
}

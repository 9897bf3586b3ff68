//! Represents a packaged deployment archive.

use bytes::Bytes;
use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};
use zip::{ZipArchive, result::ZipResult};

/// MIME type the archive is uploaded with.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// An immutable zip blob produced from an `AssetMap`.
///
/// Every publish creates a fresh archive; nothing is deduplicated.
#[derive(Clone, Debug)]
pub struct Archive {
    bytes: Bytes,
    entry_count: usize,
}

impl Archive {
    pub(crate) fn new(bytes: Bytes, entry_count: usize) -> Self {
        Self { bytes, entry_count }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Lowercase hex MD5 of the archive bytes.
    pub fn md5_hex(&self) -> String {
        format!("{:x}", md5::compute(&self.bytes))
    }

    /// Decode every entry back into `path -> content`.
    pub fn unpack(&self) -> ZipResult<BTreeMap<String, Vec<u8>>> {
        let mut zip = ZipArchive::new(Cursor::new(self.bytes.as_ref()))?;
        let mut out = BTreeMap::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            out.insert(file.name().to_string(), buf);
        }
        Ok(out)
    }
}

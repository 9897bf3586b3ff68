//! Packs an `AssetMap` into a zip archive.
//!
//! Output depends only on the `(path, content)` pairs: entries go in
//! lexicographic order with a fixed timestamp and fixed permissions, so the
//! same tree always yields the same bytes.

use crate::{
    errors::{PublishError, PublishResult},
    models::{archive::Archive, asset::AssetMap},
};
use bytes::Bytes;
use std::{
    fs::File,
    io::{self, Cursor},
};
use tracing::{debug, info};
use zip::{CompressionMethod, DateTime, ZipWriter, write::SimpleFileOptions};

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Serialize every asset into a single archive held in memory.
pub fn build_archive(assets: &AssetMap) -> PublishResult<Archive> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = entry_options();

    for entry in assets.iter() {
        let mut file = File::open(entry.source()).map_err(|e| PublishError::io(entry.source(), e))?;
        zip.start_file(entry.relative_path.as_str(), options)?;
        let copied = io::copy(&mut file, &mut zip).map_err(|e| PublishError::io(entry.source(), e))?;
        debug!("archived {} ({} bytes)", entry.relative_path, copied);
    }

    let bytes = zip.finish()?.into_inner();
    info!("built archive: {} entries, {} bytes", assets.len(), bytes.len());
    Ok(Archive::new(Bytes::from(bytes), assets.len()))
}

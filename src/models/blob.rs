//! Represents a blob stored in a container and the coordinates used to
//! address it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a single committed blob.
///
/// The struct describes the blob, not its content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Blob {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent container.
    pub container_id: Uuid,

    /// Blob name (path-like identifier within the container).
    pub name: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the content.
    pub etag: String,

    /// Timestamp of the last committed write.
    pub last_modified: DateTime<Utc>,
}

/// Where a blob lives: `(account, container, blob)`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobLocation {
    pub account_name: String,
    pub container_name: String,
    pub blob_name: String,
}

impl BlobLocation {
    pub fn new(
        account_name: impl Into<String>,
        container_name: impl Into<String>,
        blob_name: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            container_name: container_name.into(),
            blob_name: blob_name.into(),
        }
    }

    /// True when any coordinate is empty.
    pub fn is_incomplete(&self) -> bool {
        self.account_name.is_empty() || self.container_name.is_empty() || self.blob_name.is_empty()
    }
}

/// Acknowledgment that a blob was fully committed by the storage plane.
///
/// Only obtainable through [`StorageControlPlane::acknowledge`], which
/// implementations call once the upload is durable. Signing requires one, so
/// a partially uploaded archive can never be referenced by a signed URL.
///
/// [`StorageControlPlane::acknowledge`]: crate::services::control_plane::StorageControlPlane::acknowledge
#[derive(Serialize, Clone, Debug)]
pub struct UploadReceipt {
    pub(crate) account_name: String,
    pub(crate) container_name: String,
    pub(crate) blob_name: String,
    pub(crate) etag: String,
    pub(crate) size_bytes: u64,
    pub(crate) uploaded_at: DateTime<Utc>,
}

impl UploadReceipt {
    pub(crate) fn acknowledge(location: &BlobLocation, etag: String, size_bytes: u64) -> Self {
        Self {
            account_name: location.account_name.clone(),
            container_name: location.container_name.clone(),
            blob_name: location.blob_name.clone(),
            etag,
            size_bytes,
            uploaded_at: Utc::now(),
        }
    }

    pub fn location(&self) -> BlobLocation {
        BlobLocation::new(&self.account_name, &self.container_name, &self.blob_name)
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.uploaded_at
    }
}

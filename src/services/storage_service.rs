//! src/services/storage_service.rs
//!
//! StorageService: the local storage plane. SQLite holds container and blob
//! metadata, local disk holds blob payloads sharded beneath
//! `base_path/{container}/{shard}/{shard}/{blob}`, and the configured account
//! key signs and verifies read tokens.

use crate::{
    config::AppConfig,
    errors::{PublishError, PublishResult},
    models::{
        blob::{Blob, BlobLocation, UploadReceipt},
        container::Container,
        sas::ServiceSasParameters,
    },
    services::{
        control_plane::StorageControlPlane,
        sas::{self, InvalidAccountKey, SasRejection, SasToken},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("blob `{blob}` not found in container `{container}`")]
    BlobNotFound { container: String, blob: String },
    #[error("invalid blob name")]
    InvalidBlobName,
    #[error("storage account `{0}` not found")]
    AccountNotFound(String),
    #[error("storage account `{account}` not found in resource group `{resource_group}`")]
    ResourceGroupMismatch {
        account: String,
        resource_group: String,
    },
    #[error("canonicalized resource `{0}` is not a blob in this account")]
    InvalidResource(String),
    #[error("account keys for `{0}` are not available to this identity")]
    KeysNotListable(String),
    #[error("access denied: {0}")]
    SasRejected(#[from] SasRejection),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Identity of the single storage account this plane serves.
#[derive(Clone, Debug)]
pub struct AccountSettings {
    pub name: String,
    pub resource_group: String,
    /// Decoded account key. `None` means the caller may not list keys, so no
    /// token can be issued or verified.
    pub key: Option<Vec<u8>>,
}

impl AccountSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, InvalidAccountKey> {
        let key = cfg
            .account_key
            .as_deref()
            .map(sas::decode_account_key)
            .transpose()?;
        Ok(Self {
            name: cfg.account_name.clone(),
            resource_group: cfg.resource_group.clone(),
            key,
        })
    }
}

/// StorageService provides the operations a run-from-package deployment
/// needs from storage:
/// - Upload a blob (writes bytes to disk and upserts metadata into SQLite)
/// - Read a blob (metadata from SQLite, payload from disk)
/// - Issue and verify read-only service SAS tokens
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where blob payloads are stored.
    pub base_path: PathBuf,

    /// The account whose key signs tokens.
    pub account: AccountSettings,
}

const MAX_BLOB_NAME_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;
const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

/// Run the embedded schema migration against `db`.
pub async fn run_migrations(db: &SqlitePool) -> StorageResult<()> {
    let statements = INIT_MIGRATION
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for blob payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, account: AccountSettings) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            account,
        }
    }

    /// Rejects empty or oversized names, leading `/`, `..`, backslashes and
    /// control characters so a blob name can never leave its container root.
    fn ensure_blob_name_safe(&self, blob: &str) -> StorageResult<()> {
        if blob.is_empty() || blob.len() > MAX_BLOB_NAME_LEN {
            return Err(StorageError::InvalidBlobName);
        }
        if blob.starts_with('/') || blob.contains("..") {
            return Err(StorageError::InvalidBlobName);
        }
        if blob
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidBlobName);
        }
        Ok(())
    }

    /// Validate container name format:
    /// - 3–63 characters
    /// - lowercase letters, digits and hyphens only
    /// - starts and ends with a letter or digit
    /// - no consecutive hyphens
    fn ensure_container_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidContainerName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, and hyphens",
            ));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("--") {
            return Err(invalid("cannot contain consecutive hyphens"));
        }
        Ok(())
    }

    fn ensure_account(&self, account: &str) -> StorageResult<()> {
        if account == self.account.name {
            Ok(())
        } else {
            Err(StorageError::AccountNotFound(account.to_string()))
        }
    }

    fn account_key(&self) -> StorageResult<&[u8]> {
        self.account
            .key
            .as_deref()
            .ok_or_else(|| StorageError::KeysNotListable(self.account.name.clone()))
    }

    /// Compute the physical base folder path for a container.
    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    /// Two-level shard identifiers: the first two bytes of
    /// MD5(container/blob) as lowercase hex.
    fn blob_shards(container: &str, blob: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, blob));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// `base_path/container/{shard}/{shard}/{blob}`. Parents may not exist yet.
    fn blob_path(&self, container: &str, blob: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::blob_shards(container, blob);
        let mut path = self.container_root(container);
        path.push(shard_a);
        path.push(shard_b);
        path.push(blob);
        path
    }

    async fn fetch_container(&self, container: &str) -> StorageResult<Container> {
        self.ensure_container_name_safe(container)?;
        sqlx::query_as::<sqlx::sqlite::Sqlite, Container>(
            "SELECT id, name, created_at FROM containers WHERE name = ?",
        )
        .bind(container)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ContainerNotFound(container.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_blob(&self, container: &Container, blob: &str) -> StorageResult<Blob> {
        sqlx::query_as::<_, Blob>(
            "SELECT id, container_id, name, content_type, size_bytes, etag, last_modified
             FROM blobs
             WHERE name = ? AND container_id = ?",
        )
        .bind(blob)
        .bind(container.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BlobNotFound {
                container: container.name.clone(),
                blob: blob.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Return the container, creating its row and directory on first use.
    pub async fn ensure_container(&self, name: &str) -> StorageResult<Container> {
        self.ensure_container_name_safe(name)?;
        fs::create_dir_all(self.container_root(name)).await?;

        sqlx::query(
            "INSERT INTO containers (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        self.fetch_container(name).await
    }

    /// Stream-upload a blob to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts the metadata row (last write wins).
    ///
    /// Nothing is visible under the blob name until the rename and the
    /// metadata upsert both succeed. A failed overwrite leaves the previous
    /// payload and its metadata in place.
    pub async fn upload_blob_stream<S>(
        &self,
        container: &str,
        blob: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Blob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_blob_name_safe(blob)?;
        let container_rec = self.ensure_container(container).await?;

        let file_path = self.blob_path(&container_rec.name, blob);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        let etag = format!("{:x}", digest.compute());

        // The metadata row stays uncommitted until the payload is in place,
        // and the previous payload stays linked aside until the row commits.
        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };
        let upserted = sqlx::query_as::<_, Blob>(
            r#"
            INSERT INTO blobs (
                id, container_id, name, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container_id, name) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, container_id, name, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(container_rec.id)
        .bind(blob)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;
        let rec = match upserted {
            Ok(rec) => rec,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Sqlx(err));
            }
        };

        let backup_path = parent.join(format!(".bak-{}", Uuid::new_v4()));
        let had_previous = match fs::hard_link(&file_path, &backup_path).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        };

        if let Err(err) = replace_file(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            restore_previous(&backup_path, &file_path, had_previous).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = tx.commit().await {
            restore_previous(&backup_path, &file_path, had_previous).await;
            return Err(StorageError::Sqlx(err));
        }
        if had_previous {
            let _ = fs::remove_file(&backup_path).await;
        }

        debug!(
            "committed {}/{} ({} bytes, etag {})",
            container_rec.name, blob, rec.size_bytes, rec.etag
        );
        Ok(rec)
    }

    /// Fetch a blob for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns BlobNotFound if metadata exists but the physical file is missing.
    pub async fn get_blob_reader(&self, container: &str, blob: &str) -> StorageResult<(Blob, File)> {
        let rec = self.get_blob_metadata(container, blob).await?;

        let file_path = self.blob_path(container, blob);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::BlobNotFound {
                    container: container.to_string(),
                    blob: blob.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((rec, file))
    }

    /// Fetch only blob metadata.
    pub async fn get_blob_metadata(&self, container: &str, blob: &str) -> StorageResult<Blob> {
        self.ensure_blob_name_safe(blob)?;
        let container_rec = self.fetch_container(container).await?;
        self.fetch_blob(&container_rec, blob).await
    }

    /// Issue a read token for the blob named by `params.canonicalized_resource`.
    ///
    /// The blob must already exist: tokens are never handed out for content
    /// that has not been committed.
    pub async fn issue_service_sas(&self, params: &ServiceSasParameters) -> StorageResult<String> {
        self.ensure_account(&params.account_name)?;
        if params.resource_group_name != self.account.resource_group {
            return Err(StorageError::ResourceGroupMismatch {
                account: params.account_name.clone(),
                resource_group: params.resource_group_name.clone(),
            });
        }
        let key = self.account_key()?;

        let (container, blob) = self.split_canonicalized_resource(&params.canonicalized_resource)?;
        self.get_blob_metadata(container, blob).await?;

        let token = sas::issue_token(params, key)
            .map_err(|_| StorageError::KeysNotListable(self.account.name.clone()))?;
        info!(
            "issued {} token for {} valid {} .. {}",
            params.permissions, params.canonicalized_resource,
            params.shared_access_start_time, params.shared_access_expiry_time
        );
        Ok(token)
    }

    /// `/blob/{account}/{container}/{blob}` -> `(container, blob)`
    fn split_canonicalized_resource<'a>(&self, resource: &'a str) -> StorageResult<(&'a str, &'a str)> {
        let invalid = || StorageError::InvalidResource(resource.to_string());
        let rest = resource.strip_prefix("/blob/").ok_or_else(invalid)?;
        let (account, rest) = rest.split_once('/').ok_or_else(invalid)?;
        self.ensure_account(account)?;
        let (container, blob) = rest.split_once('/').ok_or_else(invalid)?;
        if container.is_empty() || blob.is_empty() {
            return Err(invalid());
        }
        Ok((container, blob))
    }

    /// Check that `query` carries a token granting read access to the blob
    /// at `now`.
    pub fn verify_read_access(
        &self,
        container: &str,
        blob: &str,
        query: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let key = self.account_key()?;
        let token = SasToken::from_query(query)?;
        token.verify(key, &self.account.name, container, blob, now)?;
        Ok(())
    }
}

/// Move `from` over `to`, replacing any existing file.
async fn replace_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(to).await?;
            fs::rename(from, to).await
        }
        other => other,
    }
}

/// Put the payload that was linked aside back under `file_path`, or remove the
/// new payload when there was none before.
async fn restore_previous(backup_path: &Path, file_path: &Path, had_previous: bool) {
    let restored = if had_previous {
        replace_file(backup_path, file_path).await
    } else {
        match fs::remove_file(file_path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    };
    if let Err(err) = restored {
        warn!("could not restore {}: {}", file_path.display(), err);
    }
}

#[async_trait]
impl StorageControlPlane for StorageService {
    async fn upload_blob(
        &self,
        location: &BlobLocation,
        content_type: &str,
        content: Bytes,
    ) -> PublishResult<UploadReceipt> {
        let upload_err = |reason: String| PublishError::Upload {
            blob: location.blob_name.clone(),
            reason,
        };

        self.ensure_account(&location.account_name)
            .map_err(|err| upload_err(err.to_string()))?;
        let body = stream::once(async move { Ok::<_, io::Error>(content) });
        let rec = self
            .upload_blob_stream(
                &location.container_name,
                &location.blob_name,
                Some(content_type.to_string()),
                body,
            )
            .await
            .map_err(|err| upload_err(err.to_string()))?;

        Ok(self.acknowledge(location, rec.etag, rec.size_bytes.max(0) as u64))
    }

    async fn list_service_sas(&self, params: &ServiceSasParameters) -> PublishResult<String> {
        self.issue_service_sas(params).await.map_err(|err| match &err {
            StorageError::KeysNotListable(_) => PublishError::Authorization {
                resource: params.canonicalized_resource.clone(),
                reason: err.to_string(),
            },
            StorageError::AccountNotFound(_)
            | StorageError::ResourceGroupMismatch { .. }
            | StorageError::ContainerNotFound(_)
            | StorageError::BlobNotFound { .. } => {
                PublishError::NotFound(params.canonicalized_resource.clone())
            }
            StorageError::InvalidResource(_)
            | StorageError::InvalidContainerName { .. }
            | StorageError::InvalidBlobName => PublishError::InvalidRequest(err.to_string()),
            _ => PublishError::ControlPlane(err.to_string()),
        })
    }
}

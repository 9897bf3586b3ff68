//! Storage control plane abstraction.
//!
//! The publisher only ever talks to storage through this trait: one call to
//! commit an archive, one call to ask for a read token. `StorageService`
//! implements it against the local storage plane; tests plug in fakes.

use crate::{
    errors::PublishResult,
    models::{
        blob::{BlobLocation, UploadReceipt},
        sas::ServiceSasParameters,
    },
};
use async_trait::async_trait;
use bytes::Bytes;

#[async_trait]
pub trait StorageControlPlane: Send + Sync {
    /// Commit `content` as the blob at `location`, all or nothing.
    ///
    /// Returns a receipt only once the blob is durable and visible.
    /// Overwrites any existing blob of the same name.
    async fn upload_blob(
        &self,
        location: &BlobLocation,
        content_type: &str,
        content: Bytes,
    ) -> PublishResult<UploadReceipt>;

    /// Issue a service SAS token for `params.canonicalized_resource`.
    ///
    /// Fails with `Authorization` when the identity may not list account keys
    /// and with `NotFound` when the account, container or blob is unknown.
    async fn list_service_sas(&self, params: &ServiceSasParameters) -> PublishResult<String>;

    /// Receipt for a blob this plane has durably committed at `location`.
    ///
    /// The only way to obtain an `UploadReceipt`; call it from `upload_blob`
    /// after the commit succeeds.
    fn acknowledge(&self, location: &BlobLocation, etag: String, size_bytes: u64) -> UploadReceipt {
        UploadReceipt::acknowledge(location, etag, size_bytes)
    }
}

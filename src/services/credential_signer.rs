//! Composes read-only, https-only signed URLs for uploaded packages.

use crate::{
    errors::{PublishError, PublishResult},
    models::sas::{ServiceSasParameters, SignedUrl, SignedUrlRequest},
    services::{control_plane::StorageControlPlane, sas::encode_blob_path},
};
use std::sync::Arc;
use tracing::{info, warn};

/// Asks the control plane for a token and joins it onto the blob URL.
///
/// Every call issues a fresh token; nothing is cached between requests.
#[derive(Clone)]
pub struct CredentialSigner {
    control_plane: Arc<dyn StorageControlPlane>,
    endpoint_suffix: String,
}

impl CredentialSigner {
    pub fn new(control_plane: Arc<dyn StorageControlPlane>, endpoint_suffix: impl Into<String>) -> Self {
        Self {
            control_plane,
            endpoint_suffix: endpoint_suffix.into(),
        }
    }

    /// `https://{account}.{suffix}/{container}/{blob}`
    pub fn base_blob_url(&self, request: &SignedUrlRequest) -> String {
        format!(
            "https://{}.{}/{}/{}",
            request.account_name(),
            self.endpoint_suffix,
            request.container_name(),
            encode_blob_path(request.blob_name())
        )
    }

    pub async fn sign(&self, request: &SignedUrlRequest) -> PublishResult<SignedUrl> {
        if request.account_name().is_empty()
            || request.container_name().is_empty()
            || request.blob_name().is_empty()
        {
            return Err(PublishError::InvalidRequest(format!(
                "incomplete blob coordinates `{}`",
                request.canonicalized_resource()
            )));
        }
        if request.valid_from() >= request.valid_until() {
            warn!(
                "validity window {} .. {} is empty; the issued token will always be rejected",
                request.valid_from(),
                request.valid_until()
            );
        }

        let params = ServiceSasParameters::from(request);
        let token = self.control_plane.list_service_sas(&params).await?;
        info!(
            "signed {} until {}",
            params.canonicalized_resource,
            request.valid_until()
        );

        Ok(SignedUrl {
            base_blob_url: self.base_blob_url(request),
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        blob::{BlobLocation, UploadReceipt},
        sas::{SasPermissions, SasProtocol, SignedResource},
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;

    /// Records every token request and answers with a numbered token.
    #[derive(Default)]
    struct RecordingPlane {
        requests: Mutex<Vec<ServiceSasParameters>>,
    }

    #[async_trait]
    impl StorageControlPlane for RecordingPlane {
        async fn upload_blob(
            &self,
            location: &BlobLocation,
            _content_type: &str,
            content: Bytes,
        ) -> PublishResult<UploadReceipt> {
            Ok(self.acknowledge(location, "etag".into(), content.len() as u64))
        }

        async fn list_service_sas(&self, params: &ServiceSasParameters) -> PublishResult<String> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(params.clone());
            Ok(format!("sig={}", requests.len()))
        }
    }

    fn receipt(blob: &str) -> UploadReceipt {
        RecordingPlane::default().acknowledge(
            &BlobLocation::new("acct", "deployments", blob),
            "etag".into(),
            3,
        )
    }

    #[tokio::test]
    async fn request_is_https_only_read_only_blob_scoped() {
        let plane = Arc::new(RecordingPlane::default());
        let signer = CredentialSigner::new(plane.clone(), "blob.core.windows.net");
        let now = Utc::now();
        let request =
            SignedUrlRequest::from_receipt(&receipt("app.zip"), "rg", now, now + Duration::hours(1));

        let url = signer.sign(&request).await.unwrap();
        assert_eq!(
            url.to_string(),
            "https://acct.blob.core.windows.net/deployments/app.zip?sig=1"
        );

        let requests = plane.requests.lock().unwrap();
        let params = &requests[0];
        assert_eq!(params.protocols, SasProtocol::Https);
        assert_eq!(params.permissions, SasPermissions::read_only());
        assert_eq!(params.resource, SignedResource::Blob);
        assert_eq!(params.resource_group_name, "rg");
        assert_eq!(params.canonicalized_resource, "/blob/acct/deployments/app.zip");
        assert_eq!(params.shared_access_start_time, now);
    }

    #[tokio::test]
    async fn tokens_are_never_reused() {
        let plane = Arc::new(RecordingPlane::default());
        let signer = CredentialSigner::new(plane.clone(), "blob.core.windows.net");
        let now = Utc::now();

        let a = SignedUrlRequest::from_receipt(&receipt("a.zip"), "rg", now, now + Duration::hours(1));
        let b = SignedUrlRequest::from_receipt(&receipt("b.zip"), "rg", now, now + Duration::hours(1));
        let first = signer.sign(&a).await.unwrap();
        let second = signer.sign(&b).await.unwrap();
        let again = signer.sign(&a).await.unwrap();

        assert_ne!(first.token, second.token);
        assert_ne!(first.token, again.token);
        assert_eq!(plane.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn incomplete_coordinates_never_reach_the_plane() {
        let plane = Arc::new(RecordingPlane::default());
        let signer = CredentialSigner::new(plane.clone(), "blob.core.windows.net");
        let now = Utc::now();
        let request =
            SignedUrlRequest::from_receipt(&receipt(""), "rg", now, now + Duration::hours(1));

        let err = signer.sign(&request).await.unwrap_err();
        assert!(matches!(err, PublishError::InvalidRequest(_)));
        assert!(plane.requests.lock().unwrap().is_empty());
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use runpack::{
    PublishError, PublishResult, StorageControlPlane,
    models::{
        blob::{BlobLocation, UploadReceipt},
        sas::ServiceSasParameters,
    },
    services::sas::{self, SasToken},
};
use std::{collections::HashMap, fs, path::Path, sync::Mutex};
use tempfile::TempDir;

pub const ACCOUNT: &str = "a7storage";
pub const RESOURCE_GROUP: &str = "a7-python-webapp-rg2";
pub const KEY: &[u8] = b"fake-control-plane-key";

/// In-memory storage plane that signs and verifies real tokens.
pub struct FakeControlPlane {
    key: Option<Vec<u8>>,
    fail_uploads: bool,
    blobs: Mutex<HashMap<BlobLocation, Bytes>>,
    pub sas_requests: Mutex<Vec<ServiceSasParameters>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            key: Some(KEY.to_vec()),
            fail_uploads: false,
            blobs: Mutex::new(HashMap::new()),
            sas_requests: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn without_keys() -> Self {
        Self {
            key: None,
            ..Self::new()
        }
    }

    #[allow(dead_code)]
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::new()
        }
    }

    #[allow(dead_code)]
    pub fn blob(&self, location: &BlobLocation) -> Option<Bytes> {
        self.blobs.lock().unwrap().get(location).cloned()
    }

    /// Resolve a signed URL the way the storage endpoint would at `now`.
    pub fn fetch(&self, url: &str, now: DateTime<Utc>) -> Result<Bytes, String> {
        let rest = url.strip_prefix("https://").ok_or("not an https url")?;
        let (host, rest) = rest.split_once('/').ok_or("missing path")?;
        let account = host
            .strip_suffix(".blob.core.windows.net")
            .ok_or("unexpected host")?;
        let (path, query) = rest.split_once('?').ok_or("missing token")?;
        let (container, blob) = path.split_once('/').ok_or("missing blob")?;
        let blob = percent_decode_str(blob)
            .decode_utf8()
            .map_err(|e| e.to_string())?;

        let key = self.key.as_deref().ok_or("no key")?;
        let token = SasToken::parse(query).map_err(|e| e.to_string())?;
        token
            .verify(key, account, container, &blob, now)
            .map_err(|e| e.to_string())?;

        self.blob(&BlobLocation::new(account, container, blob.into_owned()))
            .ok_or_else(|| "blob not found".to_string())
    }
}

#[async_trait]
impl StorageControlPlane for FakeControlPlane {
    async fn upload_blob(
        &self,
        location: &BlobLocation,
        _content_type: &str,
        content: Bytes,
    ) -> PublishResult<UploadReceipt> {
        if self.fail_uploads {
            return Err(PublishError::Upload {
                blob: location.blob_name.clone(),
                reason: "connection reset".into(),
            });
        }
        let etag = format!("{:x}", md5::compute(&content));
        let size = content.len() as u64;
        self.blobs.lock().unwrap().insert(location.clone(), content);
        Ok(self.acknowledge(location, etag, size))
    }

    async fn list_service_sas(&self, params: &ServiceSasParameters) -> PublishResult<String> {
        self.sas_requests.lock().unwrap().push(params.clone());
        let key = self.key.as_deref().ok_or_else(|| PublishError::Authorization {
            resource: params.canonicalized_resource.clone(),
            reason: "listKeys denied".into(),
        })?;

        let exists = self.blobs.lock().unwrap().keys().any(|loc| {
            params.account_name == ACCOUNT
                && params.resource_group_name == RESOURCE_GROUP
                && params.canonicalized_resource
                    == format!(
                        "/blob/{}/{}/{}",
                        loc.account_name, loc.container_name, loc.blob_name
                    )
        });
        if !exists {
            return Err(PublishError::NotFound(params.canonicalized_resource.clone()));
        }
        sas::issue_token(params, key).map_err(|e| PublishError::ControlPlane(e.to_string()))
    }
}

pub struct SourceTree {
    pub root: TempDir,
}

impl SourceTree {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let tree = Self {
            root: tempfile::tempdir().unwrap(),
        };
        for (rel, content) in files {
            tree.write(rel, content);
        }
        tree
    }

    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>) {
        let path = self.root.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

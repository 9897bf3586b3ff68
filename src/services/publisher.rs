//! Deployment publisher: map -> archive -> upload -> sign.
//!
//! Each stage consumes the previous stage's output and any failure aborts the
//! run. Signing takes the upload receipt, so it cannot start before the
//! archive is committed.

use crate::{
    config::AppConfig,
    errors::{PublishError, PublishResult},
    models::{
        archive::ARCHIVE_CONTENT_TYPE,
        blob::{BlobLocation, UploadReceipt},
        sas::{SignedUrl, SignedUrlRequest},
        topology::{RUN_FROM_PACKAGE_SETTING, Topology},
    },
    services::{
        archive_builder::build_archive, asset_mapper::map_assets,
        control_plane::StorageControlPlane, credential_signer::CredentialSigner,
    },
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinError;
use tracing::info;

/// Inputs that stay fixed across publishes.
#[derive(Clone, Debug)]
pub struct PublishSettings {
    pub location: BlobLocation,
    pub resource_group: String,
    pub valid_for: Duration,
}

impl PublishSettings {
    pub fn from_config(cfg: &AppConfig) -> PublishResult<Self> {
        let valid_for = Duration::try_hours(cfg.sas_valid_hours).ok_or_else(|| {
            PublishError::InvalidRequest(format!(
                "validity of {} hours is out of range",
                cfg.sas_valid_hours
            ))
        })?;
        Ok(Self {
            location: BlobLocation::new(&cfg.account_name, &cfg.container, &cfg.blob_name),
            resource_group: cfg.resource_group.clone(),
            valid_for,
        })
    }
}

/// Outcome of a successful publish.
#[derive(Serialize, Clone, Debug)]
pub struct Deployment {
    pub asset_paths: Vec<String>,
    pub archive_bytes: usize,
    pub archive_md5: String,
    pub receipt: UploadReceipt,
    pub signed_url: SignedUrl,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Deployment {
    /// The runtime setting the hosting platform consumes.
    pub fn app_setting(&self) -> (&'static str, String) {
        (RUN_FROM_PACKAGE_SETTING, self.signed_url.to_string())
    }

    /// `topology` with the web app pointed at this package.
    pub fn apply_to(&self, topology: Topology) -> Topology {
        topology.with_package_url(&self.signed_url.to_string())
    }
}

pub struct Publisher {
    control_plane: Arc<dyn StorageControlPlane>,
    signer: CredentialSigner,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(
        control_plane: Arc<dyn StorageControlPlane>,
        endpoint_suffix: impl Into<String>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            signer: CredentialSigner::new(control_plane.clone(), endpoint_suffix),
            control_plane,
            settings,
        }
    }

    /// Publish `source_dir`, with the token valid from now.
    pub async fn publish(&self, source_dir: impl Into<PathBuf>) -> PublishResult<Deployment> {
        self.publish_at(source_dir, Utc::now()).await
    }

    /// Publish `source_dir` with the token window starting at `valid_from`.
    pub async fn publish_at(
        &self,
        source_dir: impl Into<PathBuf>,
        valid_from: DateTime<Utc>,
    ) -> PublishResult<Deployment> {
        if self.settings.location.is_incomplete() {
            return Err(PublishError::InvalidRequest(format!(
                "incomplete package location {:?}",
                self.settings.location
            )));
        }
        let valid_until = valid_from
            .checked_add_signed(self.settings.valid_for)
            .ok_or_else(|| {
                PublishError::InvalidRequest(format!(
                    "token window starting {} for {} overflows",
                    valid_from, self.settings.valid_for
                ))
            })?;
        let source_dir = source_dir.into();
        info!("publishing {}", source_dir.display());

        // Walk and pack off the async runtime; both are blocking file I/O.
        let root = source_dir.clone();
        let (assets, archive) = tokio::task::spawn_blocking(move || {
            let assets = map_assets(&root)?;
            let archive = build_archive(&assets)?;
            Ok::<_, PublishError>((assets, archive))
        })
        .await
        .map_err(|err| packaging_failed(&source_dir, err))??;

        let archive_bytes = archive.len();
        let archive_md5 = archive.md5_hex();
        let receipt = self
            .control_plane
            .upload_blob(
                &self.settings.location,
                ARCHIVE_CONTENT_TYPE,
                archive.into_bytes(),
            )
            .await?;
        info!(
            "uploaded {}/{} ({} bytes, etag {})",
            receipt.container_name, receipt.blob_name, receipt.size_bytes, receipt.etag
        );

        let request = SignedUrlRequest::from_receipt(
            &receipt,
            &self.settings.resource_group,
            valid_from,
            valid_until,
        );
        let signed_url = self.signer.sign(&request).await?;

        Ok(Deployment {
            asset_paths: assets.paths().map(str::to_string).collect(),
            archive_bytes,
            archive_md5,
            receipt,
            signed_url,
            valid_from,
            valid_until,
        })
    }
}

/// The packaging task panicked or was cancelled before producing an archive.
fn packaging_failed(source_dir: &Path, err: JoinError) -> PublishError {
    PublishError::io(source_dir, io::Error::other(err))
}

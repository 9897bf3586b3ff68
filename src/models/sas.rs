//! Shared-access-signature request and result types.

use crate::models::blob::UploadReceipt;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Protocols a token may be presented over.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SasProtocol {
    /// `spr=https`
    Https,
    /// `spr=https,http`
    HttpsAndHttp,
}

impl SasProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SasProtocol::Https => "https",
            SasProtocol::HttpsAndHttp => "https,http",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "https" => Some(SasProtocol::Https),
            "https,http" => Some(SasProtocol::HttpsAndHttp),
            _ => None,
        }
    }
}

/// Permission set granted by a token, rendered in canonical `racwdl` order.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub list: bool,
}

impl SasPermissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Parse an `sp` value. Unknown or repeated letters are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let mut perms = Self::default();
        for c in value.chars() {
            let slot = match c {
                'r' => &mut perms.read,
                'a' => &mut perms.add,
                'c' => &mut perms.create,
                'w' => &mut perms.write,
                'd' => &mut perms.delete,
                'l' => &mut perms.list,
                _ => return None,
            };
            if *slot {
                return None;
            }
            *slot = true;
        }
        Some(perms)
    }
}

impl fmt::Display for SasPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.list, 'l'),
        ];
        for (set, c) in flags {
            if set {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Kind of resource a service SAS is scoped to. Only blobs are issued here.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedResource {
    Blob,
}

impl SignedResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedResource::Blob => "b",
        }
    }
}

/// Everything needed to ask the control plane for a read token on one blob.
///
/// Only constructible from an `UploadReceipt`, so a token can never be
/// requested for an archive whose upload was not acknowledged. Protocol and
/// permissions are fixed to https-only and read-only.
#[derive(Serialize, Clone, Debug)]
pub struct SignedUrlRequest {
    account_name: String,
    resource_group_name: String,
    container_name: String,
    blob_name: String,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    allowed_protocols: SasProtocol,
    permissions: SasPermissions,
}

impl SignedUrlRequest {
    pub fn from_receipt(
        receipt: &UploadReceipt,
        resource_group_name: impl Into<String>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            account_name: receipt.account_name.clone(),
            resource_group_name: resource_group_name.into(),
            container_name: receipt.container_name.clone(),
            blob_name: receipt.blob_name.clone(),
            valid_from,
            valid_until,
            allowed_protocols: SasProtocol::Https,
            permissions: SasPermissions::read_only(),
        }
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn resource_group_name(&self) -> &str {
        &self.resource_group_name
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    pub fn allowed_protocols(&self) -> SasProtocol {
        self.allowed_protocols
    }

    pub fn permissions(&self) -> SasPermissions {
        self.permissions
    }

    /// `/blob/{account}/{container}/{blob}`
    pub fn canonicalized_resource(&self) -> String {
        canonicalized_blob_resource(&self.account_name, &self.container_name, &self.blob_name)
    }
}

pub fn canonicalized_blob_resource(account: &str, container: &str, blob: &str) -> String {
    format!("/blob/{}/{}/{}", account, container, blob)
}

/// Parameters of the control plane's list-service-SAS operation.
#[derive(Serialize, Clone, Debug)]
pub struct ServiceSasParameters {
    pub account_name: String,
    pub resource_group_name: String,
    pub protocols: SasProtocol,
    pub shared_access_start_time: DateTime<Utc>,
    pub shared_access_expiry_time: DateTime<Utc>,
    pub resource: SignedResource,
    pub permissions: SasPermissions,
    pub canonicalized_resource: String,
}

impl From<&SignedUrlRequest> for ServiceSasParameters {
    fn from(req: &SignedUrlRequest) -> Self {
        Self {
            account_name: req.account_name.clone(),
            resource_group_name: req.resource_group_name.clone(),
            protocols: req.allowed_protocols,
            shared_access_start_time: req.valid_from,
            shared_access_expiry_time: req.valid_until,
            resource: SignedResource::Blob,
            permissions: req.permissions,
            canonicalized_resource: req.canonicalized_resource(),
        }
    }
}

/// A blob URL plus the token that authorizes reading it.
///
/// Valid only inside the window it was issued for; never persisted.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedUrl {
    pub base_blob_url: String,
    pub token: String,
}

impl fmt::Display for SignedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.base_blob_url, self.token)
    }
}

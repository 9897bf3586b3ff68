//! Service-SAS token codec.
//!
//! Tokens are HMAC-SHA256 signatures over the blob service string-to-sign,
//! keyed with the base64-decoded account key:
//!
//! ```text
//! sp\nst\nse\ncanonicalizedResource\nsi\nsip\nspr\nsv\nsr\nsnapshot\nses\nrscc\nrscd\nrsce\nrscl\nrsct
//! ```
//!
//! The same module verifies tokens when a package is fetched, so issuance and
//! access agree on one canonical form.

use crate::models::sas::{
    SasPermissions, SasProtocol, ServiceSasParameters, SignedResource,
    canonicalized_blob_resource,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signed service version written into every token.
pub const SAS_VERSION: &str = "2022-11-02";

const SAS_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Everything except unreserved characters gets encoded in token values.
const SAS_VALUE_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Blob paths keep their `/` separators in URLs.
pub const BLOB_PATH_ENCODE_SET: AsciiSet = SAS_VALUE_ENCODE_SET.remove(b'/');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SasRejection {
    #[error("missing `{0}` parameter")]
    Missing(&'static str),
    #[error("malformed `{0}` parameter")]
    Malformed(&'static str),
    #[error("signature did not match")]
    SignatureMismatch,
    #[error("token is not scoped to a blob")]
    WrongResourceType,
    #[error("token does not grant read access")]
    PermissionDenied,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token has expired")]
    Expired,
}

#[derive(Debug, Error)]
#[error("account key is not valid base64")]
pub struct InvalidAccountKey;

/// Decode a base64 account key into raw HMAC key bytes.
pub fn decode_account_key(key: &str) -> Result<Vec<u8>, InvalidAccountKey> {
    BASE64_STANDARD.decode(key).map_err(|_| InvalidAccountKey)
}

pub fn format_sas_time(at: DateTime<Utc>) -> String {
    at.format(SAS_TIME_FORMAT).to_string()
}

fn parse_sas_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, SAS_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// The signed fields of a token, as they appear in its query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    pub version: String,
    pub start: String,
    pub expiry: String,
    pub resource: String,
    pub permissions: String,
    pub protocol: String,
    pub signature: String,
}

impl SasToken {
    /// Pull the token fields out of already-decoded query parameters.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, SasRejection> {
        let field = |name: &'static str| {
            query
                .get(name)
                .cloned()
                .ok_or(SasRejection::Missing(name))
        };
        Ok(Self {
            version: field("sv")?,
            start: field("st")?,
            expiry: field("se")?,
            resource: field("sr")?,
            permissions: field("sp")?,
            protocol: field("spr")?,
            signature: field("sig")?,
        })
    }

    /// Parse a raw `a=b&c=d` token, percent-decoding the values.
    pub fn parse(token: &str) -> Result<Self, SasRejection> {
        Self::from_query(&parse_query(token))
    }

    fn string_to_sign(&self, canonicalized_resource: &str) -> String {
        string_to_sign(
            &self.permissions,
            &self.start,
            &self.expiry,
            canonicalized_resource,
            &self.protocol,
            &self.version,
            &self.resource,
        )
    }

    /// Check the token against a blob and the current time.
    ///
    /// The signature is checked first so nothing else about a forged token is
    /// revealed.
    pub fn verify(
        &self,
        account_key: &[u8],
        account: &str,
        container: &str,
        blob: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SasRejection> {
        let resource = canonicalized_blob_resource(account, container, blob);
        let expected = BASE64_STANDARD
            .decode(&self.signature)
            .map_err(|_| SasRejection::Malformed("sig"))?;
        let mut mac =
            HmacSha256::new_from_slice(account_key).map_err(|_| SasRejection::SignatureMismatch)?;
        mac.update(self.string_to_sign(&resource).as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| SasRejection::SignatureMismatch)?;

        if self.resource != SignedResource::Blob.as_str() {
            return Err(SasRejection::WrongResourceType);
        }
        let perms =
            SasPermissions::parse(&self.permissions).ok_or(SasRejection::Malformed("sp"))?;
        if !perms.read {
            return Err(SasRejection::PermissionDenied);
        }
        // Both accepted protocol values permit https.
        SasProtocol::parse(&self.protocol).ok_or(SasRejection::Malformed("spr"))?;

        let start = parse_sas_time(&self.start).ok_or(SasRejection::Malformed("st"))?;
        let expiry = parse_sas_time(&self.expiry).ok_or(SasRejection::Malformed("se"))?;
        if now < start {
            return Err(SasRejection::NotYetValid);
        }
        if now >= expiry {
            return Err(SasRejection::Expired);
        }
        Ok(())
    }
}

fn string_to_sign(
    permissions: &str,
    start: &str,
    expiry: &str,
    canonicalized_resource: &str,
    protocol: &str,
    version: &str,
    resource: &str,
) -> String {
    // si, sip, snapshot, ses and the five response-header overrides are unused.
    format!(
        "{}\n{}\n{}\n{}\n\n\n{}\n{}\n{}\n\n\n\n\n\n\n",
        permissions, start, expiry, canonicalized_resource, protocol, version, resource
    )
}

/// Sign `params` with `account_key` and return the token query string.
pub fn issue_token(
    params: &ServiceSasParameters,
    account_key: &[u8],
) -> Result<String, InvalidAccountKey> {
    let permissions = params.permissions.to_string();
    let start = format_sas_time(params.shared_access_start_time);
    let expiry = format_sas_time(params.shared_access_expiry_time);
    let protocol = params.protocols.as_str();
    let resource = params.resource.as_str();

    let sts = string_to_sign(
        &permissions,
        &start,
        &expiry,
        &params.canonicalized_resource,
        protocol,
        SAS_VERSION,
        resource,
    );
    let mut mac = HmacSha256::new_from_slice(account_key).map_err(|_| InvalidAccountKey)?;
    mac.update(sts.as_bytes());
    let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

    let pairs = [
        ("sv", SAS_VERSION),
        ("st", start.as_str()),
        ("se", expiry.as_str()),
        ("sr", resource),
        ("sp", permissions.as_str()),
        ("spr", protocol),
        ("sig", signature.as_str()),
    ];
    Ok(pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, &SAS_VALUE_ENCODE_SET)))
        .collect::<Vec<_>>()
        .join("&"))
}

/// Split and percent-decode a query string. Later duplicates win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let v = percent_decode_str(v).decode_utf8().ok()?;
            Some((k.to_string(), v.into_owned()))
        })
        .collect()
}

/// Percent-encode a blob name for use in a URL path.
pub fn encode_blob_path(blob: &str) -> String {
    utf8_percent_encode(blob, &BLOB_PATH_ENCODE_SET).to_string()
}

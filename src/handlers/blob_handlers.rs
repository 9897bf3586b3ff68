//! HTTP handlers that hand packages to the hosting platform.
//! Bodies are streamed from disk; every request must carry a valid read
//! token in its query string.

use crate::{errors::AppError, models::blob::Blob, services::storage_service::StorageService};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Download a package `/{container}/{*blob}?<sas>` as a streaming response.
pub async fn get_blob(
    State(service): State<StorageService>,
    Path((container, blob)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    service.verify_read_access(&container, &blob, &query, Utc::now())?;
    let (meta, file) = service.get_blob_reader(&container, &blob).await?;
    debug!("serving {}/{} ({} bytes)", container, blob, meta.size_bytes);

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/{container}/{*blob}?<sas>`: same headers as GET but no body.
pub async fn head_blob(
    State(service): State<StorageService>,
    Path((container, blob)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    service.verify_read_access(&container, &blob, &query, Utc::now())?;
    let meta = service.get_blob_metadata(&container, &blob).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_blob_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn set_blob_headers(headers: &mut HeaderMap, meta: &Blob) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            blob::BlobLocation,
            sas::{SasPermissions, SasProtocol, ServiceSasParameters, SignedResource},
        },
        services::{
            control_plane::StorageControlPlane,
            sas,
            storage_service::{AccountSettings, run_migrations},
        },
    };
    use bytes::Bytes;
    use chrono::{DateTime, Duration};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn seeded_service() -> (StorageService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let account = AccountSettings {
            name: "acct".into(),
            resource_group: "rg".into(),
            key: Some(b"handler-key".to_vec()),
        };
        let service = StorageService::new(Arc::new(db), dir.path(), account);
        service
            .upload_blob(
                &BlobLocation::new("acct", "deployments", "app.zip"),
                "application/zip",
                Bytes::from_static(b"PK-package"),
            )
            .await
            .unwrap();
        (service, dir)
    }

    async fn token_for(
        service: &StorageService,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> HashMap<String, String> {
        let token = service
            .list_service_sas(&ServiceSasParameters {
                account_name: "acct".into(),
                resource_group_name: "rg".into(),
                protocols: SasProtocol::Https,
                shared_access_start_time: start,
                shared_access_expiry_time: expiry,
                resource: SignedResource::Blob,
                permissions: SasPermissions::read_only(),
                canonicalized_resource: "/blob/acct/deployments/app.zip".into(),
            })
            .await
            .unwrap();
        sas::parse_query(&token)
    }

    fn path() -> Path<(String, String)> {
        Path(("deployments".to_string(), "app.zip".to_string()))
    }

    #[tokio::test]
    async fn valid_token_streams_package() {
        let (service, _dir) = seeded_service().await;
        let now = Utc::now();
        let query = token_for(&service, now - Duration::minutes(1), now + Duration::hours(1)).await;

        let response = get_blob(State(service), path(), Query(query)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
    }

    #[tokio::test]
    async fn expired_token_is_forbidden() {
        let (service, _dir) = seeded_service().await;
        let now = Utc::now();
        let query = token_for(&service, now - Duration::hours(2), now - Duration::hours(1)).await;

        let err = head_blob(State(service), path(), Query(query)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_token_is_forbidden() {
        let (service, _dir) = seeded_service().await;
        let err = get_blob(State(service), path(), Query(HashMap::new()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn token_for_another_blob_does_not_open_this_one() {
        let (service, _dir) = seeded_service().await;
        let now = Utc::now();
        let query = token_for(&service, now - Duration::minutes(1), now + Duration::hours(1)).await;

        let other = Path(("deployments".to_string(), "other.zip".to_string()));
        let err = get_blob(State(service), other, Query(query)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }
}

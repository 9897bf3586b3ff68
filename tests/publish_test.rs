mod common;

use chrono::{Duration, Utc};
use common::{ACCOUNT, FakeControlPlane, RESOURCE_GROUP, SourceTree};
use runpack::{
    PublishError, Publisher, StorageControlPlane,
    models::{
        blob::BlobLocation,
        sas::SignedUrlRequest,
        topology::RUN_FROM_PACKAGE_SETTING,
    },
    services::{credential_signer::CredentialSigner, publisher::PublishSettings},
};
use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    sync::Arc,
};

const SUFFIX: &str = "blob.core.windows.net";

fn settings(hours: i64) -> PublishSettings {
    PublishSettings {
        location: BlobLocation::new(ACCOUNT, "deployments", "app.zip"),
        resource_group: RESOURCE_GROUP.to_string(),
        valid_for: Duration::hours(hours),
    }
}

fn unzip(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = BTreeMap::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        out.insert(file.name().to_string(), buf);
    }
    out
}

#[tokio::test]
async fn publishes_flask_app_end_to_end() {
    let tree = SourceTree::new(&[("app.py", "print(1)"), ("requirements.txt", "flask")]);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(24));

    let deployment = publisher.publish(tree.path()).await.unwrap();
    assert_eq!(deployment.asset_paths, vec!["app.py", "requirements.txt"]);

    let stored = plane
        .blob(&BlobLocation::new(ACCOUNT, "deployments", "app.zip"))
        .unwrap();
    assert_eq!(stored.len(), deployment.archive_bytes);
    let entries = unzip(&stored);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["app.py"], b"print(1)");
    assert_eq!(entries["requirements.txt"], b"flask");

    let url = deployment.signed_url.to_string();
    let prefix = format!("https://{}.blob.core.windows.net/deployments/app.zip?", ACCOUNT);
    assert!(url.starts_with(&prefix), "{}", url);
    assert!(!deployment.signed_url.token.is_empty());

    let (name, value) = deployment.app_setting();
    assert_eq!(name, RUN_FROM_PACKAGE_SETTING);
    assert_eq!(value, url);

    let fetched = plane.fetch(&url, Utc::now()).unwrap();
    assert_eq!(fetched, stored);
}

#[tokio::test]
async fn round_trip_preserves_nested_and_binary_content() {
    let binary: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let tree = SourceTree::new(&[
        ("app.py", "from flask import Flask"),
        ("templates/base/layout.html", "<html></html>"),
    ]);
    tree.write("static/img/logo.bin", &binary);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1));

    let deployment = publisher.publish(tree.path()).await.unwrap();
    let stored = plane.fetch(&deployment.signed_url.to_string(), Utc::now()).unwrap();
    let entries = unzip(&stored);

    assert_eq!(entries["static/img/logo.bin"], binary);
    assert_eq!(entries["templates/base/layout.html"], b"<html></html>");
    assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn identical_trees_produce_identical_archives() {
    let first = SourceTree::new(&[("a/one.txt", "1"), ("b/two.txt", "2"), ("three.txt", "3")]);
    let second = SourceTree::new(&[("three.txt", "3"), ("b/two.txt", "2"), ("a/one.txt", "1")]);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane, SUFFIX, settings(1));

    let a = publisher.publish(first.path()).await.unwrap();
    let b = publisher.publish(second.path()).await.unwrap();
    assert_eq!(a.archive_md5, b.archive_md5);
    assert_eq!(a.receipt.etag(), b.receipt.etag());
}

#[tokio::test]
async fn token_outside_its_window_is_rejected_at_access_time() {
    let tree = SourceTree::new(&[("app.py", "print(1)")]);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1));

    let now = Utc::now();
    let stale = publisher
        .publish_at(tree.path(), now - Duration::hours(3))
        .await
        .unwrap();
    let err = plane.fetch(&stale.signed_url.to_string(), now).unwrap_err();
    assert!(err.contains("expired"), "{}", err);

    let early = publisher
        .publish_at(tree.path(), now + Duration::hours(2))
        .await
        .unwrap();
    let err = plane.fetch(&early.signed_url.to_string(), now).unwrap_err();
    assert!(err.contains("not valid yet"), "{}", err);
}

#[tokio::test]
async fn signing_a_never_uploaded_blob_is_not_found() {
    let plane = Arc::new(FakeControlPlane::new());
    let signer = CredentialSigner::new(plane.clone(), SUFFIX);
    let receipt = plane.acknowledge(
        &BlobLocation::new(ACCOUNT, "deployments", "ghost.zip"),
        "etag".into(),
        0,
    );
    let now = Utc::now();
    let request = SignedUrlRequest::from_receipt(&receipt, RESOURCE_GROUP, now, now + Duration::hours(1));

    let err = signer.sign(&request).await.unwrap_err();
    assert!(matches!(err, PublishError::NotFound(ref r) if r == "/blob/a7storage/deployments/ghost.zip"));
}

#[tokio::test]
async fn failed_upload_is_never_signed() {
    let tree = SourceTree::new(&[("app.py", "print(1)")]);
    let plane = Arc::new(FakeControlPlane::failing_uploads());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1));

    let err = publisher.publish(tree.path()).await.unwrap_err();
    assert!(matches!(err, PublishError::Upload { .. }));
    assert!(plane.sas_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn identity_without_key_access_is_unauthorized() {
    let tree = SourceTree::new(&[("app.py", "print(1)")]);
    let plane = Arc::new(FakeControlPlane::without_keys());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1));

    let err = publisher.publish(tree.path()).await.unwrap_err();
    assert!(matches!(err, PublishError::Authorization { .. }));
}

#[tokio::test]
async fn missing_source_aborts_before_upload() {
    let tree = SourceTree::new(&[]);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1));

    let err = publisher
        .publish(tree.path().join("does-not-exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Io { .. }));
    assert!(
        plane
            .blob(&BlobLocation::new(ACCOUNT, "deployments", "app.zip"))
            .is_none()
    );
}

#[tokio::test]
async fn upload_acknowledgment_precedes_signing() {
    let tree = SourceTree::new(&[("app.py", "print(1)")]);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1));

    let deployment = publisher.publish(tree.path()).await.unwrap();
    let requests = plane.sas_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].canonicalized_resource, "/blob/a7storage/deployments/app.zip");
    assert!(deployment.receipt.uploaded_at() <= Utc::now());
}

#[tokio::test]
async fn validity_past_the_calendar_is_refused_before_upload() {
    let tree = SourceTree::new(&[("app.py", "print(1)")]);
    let plane = Arc::new(FakeControlPlane::new());
    let publisher = Publisher::new(plane.clone(), SUFFIX, settings(1_000_000_000_000));

    let err = publisher.publish(tree.path()).await.unwrap_err();
    assert!(matches!(err, PublishError::InvalidRequest(_)), "{:?}", err);
    assert!(
        plane
            .blob(&BlobLocation::new(ACCOUNT, "deployments", "app.zip"))
            .is_none()
    );
}

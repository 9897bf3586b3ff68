//! Routes for serving published packages.
//!
//! - `GET  /healthz`, `GET /readyz`: probes
//! - `GET  /{container}/{*blob}?<sas>`: download a package
//! - `HEAD /{container}/{*blob}?<sas>`: package headers only
//!
//! The wildcard `*blob` allows nested names like `builds/2025/app.zip`.

use crate::{
    handlers::{
        blob_handlers::{get_blob, head_blob},
        health_handlers::{healthz, readyz},
    },
    services::storage_service::StorageService,
};
use axum::{Router, routing::get};

/// Build the package-serving router. Handlers share `StorageService` as state.
pub fn routes() -> Router<StorageService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/{container}/{*blob}", get(get_blob).head(head_blob))
}

use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Failure of any stage of the publish pipeline.
///
/// Every stage fails fast; the caller either gets a fully valid signed URL or
/// one of these.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("I/O error at `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("upload of `{blob}` failed: {reason}")]
    Upload { blob: String, reason: String },
    #[error("not authorized to sign `{resource}`: {reason}")]
    Authorization { resource: String, reason: String },
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("control plane request failed: {0}")]
    ControlPlane(String),
}

impl PublishError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type PublishResult<T> = Result<T, PublishError>;

/// A lightweight wrapper for HTTP errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::ContainerNotFound(_) | StorageError::BlobNotFound { .. } => {
                AppError::not_found(err.to_string())
            }
            StorageError::InvalidContainerName { .. } | StorageError::InvalidBlobName => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            StorageError::SasRejected(_) | StorageError::KeysNotListable(_) => {
                AppError::forbidden(err.to_string())
            }
            _ => AppError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sas::SasRejection;

    #[test]
    fn storage_errors_map_to_http_statuses() {
        let missing = StorageError::BlobNotFound {
            container: "deployments".into(),
            blob: "app.zip".into(),
        };
        assert_eq!(AppError::from(missing).status, StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(StorageError::InvalidBlobName).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(StorageError::SasRejected(SasRejection::Expired)).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(StorageError::AccountNotFound("acct".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

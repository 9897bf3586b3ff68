//! Represents a blob container, a top-level namespace for deployment packages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage container in the local storage plane.
///
/// Containers are created on first upload and group the package blobs of
/// one or more web apps.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Container {
    /// Unique identifier for this container (UUID for internal DB use).
    pub id: Uuid,

    /// Container name (3-63 lowercase letters, digits and hyphens).
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}

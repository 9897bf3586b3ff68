//! Packages a web application's source tree into a zip archive, uploads it
//! to blob storage and publishes a time-scoped, read-only signed URL that a
//! hosting platform can run the package from.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use errors::{PublishError, PublishResult};
pub use services::{control_plane::StorageControlPlane, publisher::Publisher};

//! Core data models for packaging and publishing a web app.
//!
//! Assets and archives describe what gets shipped, blobs and containers map
//! to metadata tables via `sqlx::FromRow`, SAS types describe what gets
//! signed, and the topology types are the declarative resources handed to
//! the provisioning engine.

pub mod archive;
pub mod asset;
pub mod blob;
pub mod container;
pub mod sas;
pub mod topology;

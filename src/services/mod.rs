pub mod archive_builder;
pub mod asset_mapper;
pub mod control_plane;
pub mod credential_signer;
pub mod publisher;
pub mod sas;
pub mod storage_service;

//! Core lifecycle logic for catalog resources and their image assets.
//!
//! A catalog record (card or item) carries at most one bound binary asset.
//! This crate owns the rules that keep record and asset consistent across
//! create, update and delete: field validation ahead of any mutation, asset
//! key generation, and the ordering that guarantees a record never references
//! an asset that was not stored and a replaced asset never stays reachable.
//! Storage itself is behind the [`store::AssetStore`] trait with local-disk
//! and S3-compatible implementations.

pub mod manager;
pub mod store;
pub mod validation;

use thiserror::Error;

pub use manager::{CardResource, ItemResource, Resource, ResourceManager};
pub use store::{open_store, AssetStore, StoreConfig, StoreError};
pub use validation::{RawFields, ValidationErrors};

/// A raw binary upload as received from the transport layer.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name; only its extension survives into the
    /// generated storage key.
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Failures surfaced by the resource manager.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input rejected before any side effect; carries per-field messages.
    #[error("validation failed")]
    Validation(ValidationErrors),
    #[error("{0} {1} not found")]
    NotFound(&'static str, i64),
    #[error("asset storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

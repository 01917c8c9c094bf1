//! Asset storage backends.
//!
//! Records persist only the storage *key* of their bound asset; turning a key
//! into a retrieval path or URL happens here, at read time, so the manager
//! stays portable across backends.

pub mod local;
pub mod s3;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

pub use local::LocalStore;
pub use s3::{S3Config, S3Store};

/// Length of the random suffix in generated asset keys.
const KEY_SUFFIX_LEN: usize = 10;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure for asset '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object storage request for '{key}' failed: {source}")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("object storage returned HTTP {status} for '{key}'")]
    UnexpectedStatus { key: String, status: u16 },
}

/// A pluggable asset store.
///
/// `delete` is idempotent: deleting a key that no longer exists succeeds.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// The reference handed to clients: a request path for the local backend,
    /// a public object URL for S3.
    fn resolve(&self, key: &str) -> String;
    fn kind(&self) -> &'static str;
}

/// Backend selection resolved from configuration.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Local { root: PathBuf },
    S3(S3Config),
}

/// Builds the configured backend.
pub fn open_store(config: StoreConfig) -> Result<Arc<dyn AssetStore>, StoreError> {
    match config {
        StoreConfig::Local { root } => Ok(Arc::new(LocalStore::open(root)?)),
        StoreConfig::S3(cfg) => Ok(Arc::new(S3Store::new(cfg))),
    }
}

/// Generates a collision-resistant storage key:
/// `images/<prefix>-<id>-<unix-ts>-<random>.<ext>`. The extension is taken
/// from the client file name, reduced to something safe.
pub fn asset_key(prefix: &str, id: i64, filename: &str) -> String {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string());

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_SUFFIX_LEN)
        .map(char::from)
        .collect();

    format!(
        "images/{prefix}-{id}-{ts}-{suffix}.{ext}",
        ts = Utc::now().timestamp()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_keys_carry_prefix_id_and_extension() {
        let key = asset_key("card", 7, "portrait.JPG");
        assert!(key.starts_with("images/card-7-"));
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn asset_keys_fall_back_for_hostile_extensions() {
        assert!(asset_key("item", 1, "noextension").ends_with(".bin"));
        assert!(asset_key("item", 1, "weird.../../x").ends_with(".bin"));
        assert!(asset_key("item", 1, "x.reallylongext").ends_with(".bin"));
    }

    #[test]
    fn asset_keys_do_not_collide() {
        let keys: Vec<String> = (0..32).map(|_| asset_key("card", 1, "a.png")).collect();
        let mut unique = keys.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), keys.len());
    }
}

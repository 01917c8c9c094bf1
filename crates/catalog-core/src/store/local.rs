//! Local filesystem backend. Assets live under a configured root and are
//! served back by the daemon's static file route, so `resolve` returns a
//! request path rather than an absolute URL.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{AssetStore, StoreError};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens (and creates, if needed) the storage root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Directory the daemon mounts for static retrieval.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // Keys are generated internally; refuse traversal anyway.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.split('/').any(|part| part == "..") || key.starts_with('/') {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "key escapes storage root"),
            });
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl AssetStore for LocalStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let as_io = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(as_io)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(as_io)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone counts as deleted.
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn resolve(&self, key: &str) -> String {
        format!("/storage/{key}")
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_exists_delete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        let key = "images/card-1-1700000000-abcdefghij.png";
        assert!(!store.exists(key).await.unwrap());

        store.store(key, b"png bytes").await.unwrap();
        assert!(store.exists(key).await.unwrap());
        assert_eq!(
            tokio::fs::read(dir.path().join(key)).await.unwrap(),
            b"png bytes"
        );

        store.delete(key).await.unwrap();
        assert!(!store.exists(key).await.unwrap());
        // Second delete is a no-op, not an error.
        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        assert!(store.store("../outside.png", b"x").await.is_err());
        assert!(store.store("/absolute.png", b"x").await.is_err());
    }

    #[test]
    fn resolve_is_a_request_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(
            store.resolve("images/card-1-2-abc.jpg"),
            "/storage/images/card-1-2-abc.jpg"
        );
    }
}

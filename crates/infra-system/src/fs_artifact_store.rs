// Filesystem ArtifactStore - blobs as files under a root directory

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use photospec_core::domain::ArtifactRef;
use photospec_core::error::{AppError, Result};
use photospec_core::port::ArtifactStore;

/// Stores each artifact at `<root>/<key>`.
///
/// Keys are relative slash-separated paths such as `inputs/<job>.png`.
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a partial file.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            AppError::Storage(format!(
                "Cannot create artifact dir {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(AppError::Validation(format!(
                "Invalid artifact key: {:?}",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<ArtifactRef> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Storage(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| AppError::Storage(format!("Cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            AppError::Storage(format!("Cannot move artifact into {}: {}", path.display(), e))
        })?;

        debug!(key, bytes = data.len(), "Artifact stored");
        Ok(ArtifactRef::new(key))
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.resolve(artifact.as_str())?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Artifact {} not found", artifact)))
            }
            Err(e) => Err(AppError::Storage(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn delete(&self, artifact: &ArtifactRef) -> Result<()> {
        let path = self.resolve(artifact.as_str())?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!(
                "Cannot delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts"));
        store.init().await.unwrap();

        let r = store.put("inputs/job-1.png", b"pixels").await.unwrap();
        assert_eq!(r.as_str(), "inputs/job-1.png");
        assert!(dir.path().join("artifacts/inputs/job-1.png").exists());
        assert!(!dir.path().join("artifacts/inputs/job-1.png.tmp").exists());
        assert_eq!(store.get(&r).await.unwrap(), b"pixels");

        store.delete(&r).await.unwrap();
        assert!(matches!(store.get(&r).await, Err(AppError::NotFound(_))));
        // Idempotent
        store.delete(&r).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.put("outputs/a.jpg", b"first").await.unwrap();
        let r = store.put("outputs/a.jpg", b"second").await.unwrap();
        assert_eq!(store.get(&r).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        for key in ["", "../evil", "/etc/passwd", "inputs/../../x", "./a"] {
            let err = store.put(key, b"x").await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "key {:?}", key);
        }
    }
}

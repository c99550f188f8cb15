// Artifact Store Port (Interface)
// Blob storage for uploaded inputs and rendered outputs

use async_trait::async_trait;

use crate::domain::ArtifactRef;
use crate::error::Result;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes under `key`, overwriting any previous content
    async fn put(&self, key: &str, data: &[u8]) -> Result<ArtifactRef>;

    /// Read a stored artifact (`AppError::NotFound` when missing)
    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>>;

    /// Delete an artifact. Deleting a missing artifact is not an error.
    async fn delete(&self, artifact: &ArtifactRef) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryArtifactStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryArtifactStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        pub fn contains(&self, artifact: &ArtifactRef) -> bool {
            self.blobs.lock().unwrap().contains_key(artifact.as_str())
        }
    }

    #[async_trait]
    impl ArtifactStore for InMemoryArtifactStore {
        async fn put(&self, key: &str, data: &[u8]) -> Result<ArtifactRef> {
            self.blobs
                .lock()
                .unwrap()
                .insert(key.to_string(), data.to_vec());
            Ok(ArtifactRef::new(key))
        }

        async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
            self.blobs
                .lock()
                .unwrap()
                .get(artifact.as_str())
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("artifact {}", artifact)))
        }

        async fn delete(&self, artifact: &ArtifactRef) -> Result<()> {
            self.blobs.lock().unwrap().remove(artifact.as_str());
            Ok(())
        }
    }
}

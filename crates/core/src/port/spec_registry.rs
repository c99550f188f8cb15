// Spec Registry Port (Interface)

use async_trait::async_trait;

use crate::domain::PhotoSpec;
use crate::error::Result;

/// Keyed lookup `country_id -> PhotoSpec`
#[async_trait]
pub trait SpecRegistry: Send + Sync {
    /// Look up a spec; `None` when the country is unknown
    async fn lookup(&self, country_id: &str) -> Result<Option<PhotoSpec>>;

    /// All known specs ordered by country id
    async fn list(&self) -> Result<Vec<PhotoSpec>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory registry
    #[derive(Default)]
    pub struct InMemorySpecRegistry {
        specs: Mutex<BTreeMap<String, PhotoSpec>>,
    }

    impl InMemorySpecRegistry {
        pub fn new(specs: impl IntoIterator<Item = PhotoSpec>) -> Self {
            let map = specs
                .into_iter()
                .map(|s| (s.country_id.clone(), s))
                .collect();
            Self {
                specs: Mutex::new(map),
            }
        }

        pub fn insert(&self, spec: PhotoSpec) {
            self.specs
                .lock()
                .unwrap()
                .insert(spec.country_id.clone(), spec);
        }
    }

    #[async_trait]
    impl SpecRegistry for InMemorySpecRegistry {
        async fn lookup(&self, country_id: &str) -> Result<Option<PhotoSpec>> {
            Ok(self.specs.lock().unwrap().get(country_id).cloned())
        }

        async fn list(&self) -> Result<Vec<PhotoSpec>> {
            Ok(self.specs.lock().unwrap().values().cloned().collect())
        }
    }
}

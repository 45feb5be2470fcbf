//! StoreCatalog - backends by bucket name

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use contracts::{ContractError, StorageSettings};
use tracing::debug;

use crate::{LocalFsBackend, MemoryBackend, ObjectBucket, StorageBackend};

/// Hands out one shared backend per bucket
///
/// Backends are created on first use from `StorageSettings`. Pre-registered
/// backends (see `insert`) take precedence.
#[derive(Debug)]
pub struct StoreCatalog {
    settings: StorageSettings,
    backends: Mutex<HashMap<String, Arc<dyn StorageBackend>>>,
}

impl StoreCatalog {
    pub fn new(settings: StorageSettings) -> Self {
        Self {
            settings,
            backends: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageSettings::Memory)
    }

    /// Register a backend for its bucket, replacing any existing one
    pub fn insert(&self, backend: Arc<dyn StorageBackend>) -> Result<(), ContractError> {
        let mut backends = self
            .backends
            .lock()
            .map_err(|_| ContractError::Other("store catalog lock poisoned".into()))?;
        backends.insert(backend.bucket().to_string(), backend);
        Ok(())
    }

    /// Backend serving `bucket`
    pub fn backend(&self, bucket: &str) -> Result<Arc<dyn StorageBackend>, ContractError> {
        let mut backends = self
            .backends
            .lock()
            .map_err(|_| ContractError::Other("store catalog lock poisoned".into()))?;

        if let Some(backend) = backends.get(bucket) {
            return Ok(Arc::clone(backend));
        }

        let backend: Arc<dyn StorageBackend> = match &self.settings {
            StorageSettings::Memory => Arc::new(MemoryBackend::new(bucket)),
            StorageSettings::Local { root } => Arc::new(LocalFsBackend::new(root, bucket)),
        };
        debug!(bucket, settings = ?self.settings, "Storage backend created");
        backends.insert(bucket.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    /// Bucket handle with the given object extension
    pub fn bucket(&self, bucket: &str, extension: &str) -> Result<ObjectBucket, ContractError> {
        Ok(ObjectBucket::new(self.backend(bucket)?, extension))
    }
}

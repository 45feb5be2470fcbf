//! In-memory backend, process-local

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::ContractError;

use crate::{ObjectMeta, StorageBackend};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
        }
    }
}

/// Bucket kept in a sorted map
#[derive(Debug)]
pub struct MemoryBackend {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    fn poisoned(&self) -> ContractError {
        ContractError::storage(&self.bucket, "lock poisoned")
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, name: &str) -> Result<Bytes, ContractError> {
        let objects = self.objects.read().map_err(|_| self.poisoned())?;
        objects
            .get(name)
            .map(|object| object.data.clone())
            .ok_or_else(|| ContractError::key_not_found(&self.bucket, name))
    }

    async fn put(&self, name: &str, data: Bytes) -> Result<(), ContractError> {
        let mut objects = self.objects.write().map_err(|_| self.poisoned())?;
        objects.insert(
            name.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ContractError> {
        let mut objects = self.objects.write().map_err(|_| self.poisoned())?;
        objects.remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ContractError> {
        let objects = self.objects.read().map_err(|_| self.poisoned())?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, object)| object.meta(name))
            .collect())
    }

    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, ContractError> {
        let objects = self.objects.read().map_err(|_| self.poisoned())?;
        Ok(objects.get(name).map(|object| object.meta(name)))
    }
}

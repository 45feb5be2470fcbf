//! Storage backend abstraction
//!
//! A backend serves exactly one bucket. Object names are flat: no
//! directories, no path separators.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::ContractError;

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object name, extension included
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if the backend tracks it
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Bucket served by this backend
    fn bucket(&self) -> &str;

    /// Read an entire object
    ///
    /// Returns `ContractError::KeyNotFound` if the object doesn't exist.
    async fn get(&self, name: &str) -> Result<Bytes, ContractError>;

    /// Create or replace an object
    async fn put(&self, name: &str, data: Bytes) -> Result<(), ContractError>;

    /// Delete an object; succeeds if it doesn't exist
    async fn delete(&self, name: &str) -> Result<(), ContractError>;

    /// Objects whose name starts with `prefix`, sorted by name
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ContractError>;

    /// Object metadata without content; `None` if absent
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, ContractError>;
}

impl std::fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageBackend({})", self.bucket())
    }
}

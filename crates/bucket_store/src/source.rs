//! BucketSource - a stored object as transform input

use async_trait::async_trait;
use bytes::Bytes;
use contracts::{ContractError, SourceReader};

use crate::ObjectBucket;

/// Source backed by one stored object
///
/// The object name is resolved on `open`, so a missing or ambiguous key
/// surfaces before any transform runs. Content is read lazily.
#[derive(Debug, Clone)]
pub struct BucketSource {
    bucket: ObjectBucket,
    key: String,
    object: String,
}

impl BucketSource {
    pub async fn open(bucket: &ObjectBucket, key: &str) -> Result<Self, ContractError> {
        let object = bucket.get_key(key).await?;
        Ok(Self {
            bucket: bucket.clone(),
            key: key.to_string(),
            object,
        })
    }

    /// Resolved object name
    pub fn object(&self) -> &str {
        &self.object
    }
}

#[async_trait]
impl SourceReader for BucketSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn read(&self) -> Result<Bytes, ContractError> {
        self.bucket.read_object(&self.object).await
    }
}

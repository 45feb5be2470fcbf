//! ObjectBucket - key-level view over a storage backend
//!
//! Keys are provenance keys; objects are stored as `<key>.<extension>`.
//! Objects written by other tools may lack the extension, so lookups accept
//! both spellings.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use contracts::ContractError;

use crate::StorageBackend;

/// Bucket handle, cheap to clone
#[derive(Debug, Clone)]
pub struct ObjectBucket {
    backend: Arc<dyn StorageBackend>,
    extension: String,
}

impl ObjectBucket {
    /// `extension` without the leading dot; empty for bare names
    pub fn new(backend: Arc<dyn StorageBackend>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.').to_string();
        Self { backend, extension }
    }

    pub fn name(&self) -> &str {
        self.backend.bucket()
    }

    /// Object name a key is written under
    pub fn object_name(&self, key: &str) -> String {
        if self.extension.is_empty() {
            key.to_string()
        } else {
            format!("{key}.{}", self.extension)
        }
    }

    /// Key an object name stands for
    pub fn key_of<'a>(&self, object: &'a str) -> &'a str {
        if self.extension.is_empty() {
            return object;
        }
        object
            .strip_suffix(self.extension.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or(object)
    }

    fn candidates(&self, key: &str) -> Vec<String> {
        let mut names = vec![key.to_string()];
        let with_extension = self.object_name(key);
        if with_extension != key {
            names.push(with_extension);
        }
        names
    }

    /// Resolve a key to the one stored object name
    ///
    /// # Errors
    /// `KeyNotFound` if nothing is stored under the key,
    /// `MultipleKeys` if both the bare and the extended name exist.
    pub async fn get_key(&self, key: &str) -> Result<String, ContractError> {
        let mut matches = Vec::new();
        for name in self.candidates(key) {
            if self.backend.head(&name).await?.is_some() {
                matches.push(name);
            }
        }

        match matches.len() {
            0 => Err(ContractError::key_not_found(self.name(), key)),
            1 => Ok(matches.remove(0)),
            _ => Err(ContractError::MultipleKeys {
                bucket: self.name().to_string(),
                key: key.to_string(),
                matches,
            }),
        }
    }

    /// Whether the key is stored (ambiguous keys count as stored)
    pub async fn exists(&self, key: &str) -> Result<bool, ContractError> {
        match self.get_key(key).await {
            Ok(_) | Err(ContractError::MultipleKeys { .. }) => Ok(true),
            Err(ContractError::KeyNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn read(&self, key: &str) -> Result<Bytes, ContractError> {
        let object = self.get_key(key).await?;
        self.backend.get(&object).await
    }

    /// Read an already resolved object name
    pub async fn read_object(&self, object: &str) -> Result<Bytes, ContractError> {
        self.backend.get(object).await
    }

    /// Non-empty lines of the stored object
    pub async fn read_lines(&self, key: &str) -> Result<Vec<String>, ContractError> {
        let content = self.read(key).await?;
        Ok(String::from_utf8_lossy(&content)
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Replace the object under `key` with one line per entry
    pub async fn write_lines<I, S>(&self, key: &str, lines: I) -> Result<(), ContractError>
    where
        I: IntoIterator<Item = S> + Send,
        S: AsRef<str>,
    {
        let mut content = String::new();
        for line in lines {
            content.push_str(line.as_ref());
            content.push('\n');
        }
        self.backend
            .put(&self.object_name(key), Bytes::from(content))
            .await
    }

    pub async fn write(&self, key: &str, data: Bytes) -> Result<(), ContractError> {
        self.backend.put(&self.object_name(key), data).await
    }

    /// Keys of objects whose name starts with `prefix`
    pub async fn keys(&self, prefix: &str) -> Result<BTreeSet<String>, ContractError> {
        Ok(self
            .backend
            .list(prefix)
            .await?
            .iter()
            .map(|meta| self.key_of(&meta.name).to_string())
            .collect())
    }

    /// Remove every spelling of `key`
    pub async fn delete_key(&self, key: &str) -> Result<(), ContractError> {
        for name in self.candidates(key) {
            self.backend.delete(&name).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn bucket() -> ObjectBucket {
        ObjectBucket::new(Arc::new(MemoryBackend::new("unittest")), "json")
    }

    #[tokio::test]
    async fn test_get_key_resolves_either_spelling() {
        let bucket = bucket();
        bucket.write_lines("12", ["a"]).await.unwrap();
        assert_eq!(bucket.get_key("12").await.unwrap(), "12.json");

        assert!(matches!(
            bucket.get_key("13").await,
            Err(ContractError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_key_ambiguous() {
        let bucket = bucket();
        bucket.write_lines("12", ["a"]).await.unwrap();
        bucket
            .backend
            .put("12", Bytes::from("b\n"))
            .await
            .unwrap();

        match bucket.get_key("12").await {
            Err(ContractError::MultipleKeys { matches, .. }) => {
                assert_eq!(matches, vec!["12", "12.json"]);
            }
            other => panic!("expected MultipleKeys, got {other:?}"),
        }
        assert!(bucket.exists("12").await.unwrap());
    }

    #[tokio::test]
    async fn test_lines_and_keys() {
        let bucket = bucket();
        bucket.write_lines("12.0", ["x", "y"]).await.unwrap();
        bucket.write_lines("12.1", ["z"]).await.unwrap();

        assert_eq!(bucket.read_lines("12.0").await.unwrap(), vec!["x", "y"]);
        let keys: Vec<String> = bucket.keys("12").await.unwrap().into_iter().collect();
        assert_eq!(keys, vec!["12.0", "12.1"]);

        bucket.delete_key("12.0").await.unwrap();
        assert!(!bucket.exists("12.0").await.unwrap());
    }
}

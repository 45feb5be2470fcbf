//! Local directory backend - one directory per bucket

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use contracts::ContractError;
use tokio::fs;
use tracing::debug;

use crate::{ObjectMeta, StorageBackend};

/// Bucket stored as flat files under `root/<bucket>`
#[derive(Debug)]
pub struct LocalFsBackend {
    bucket: String,
    dir: PathBuf,
}

impl LocalFsBackend {
    /// The bucket directory is created on first write
    pub fn new(root: impl AsRef<Path>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let dir = root.as_ref().join(&bucket);
        Self { bucket, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, name: &str) -> Result<PathBuf, ContractError> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
        {
            return Err(ContractError::storage(
                &self.bucket,
                format!("invalid object name '{name}'"),
            ));
        }
        Ok(self.dir.join(name))
    }

    fn io_error(&self, name: &str, error: std::io::Error) -> ContractError {
        if error.kind() == ErrorKind::NotFound {
            ContractError::key_not_found(&self.bucket, name)
        } else {
            ContractError::storage(&self.bucket, format!("{name}: {error}"))
        }
    }
}

fn meta_of(name: String, metadata: &std::fs::Metadata) -> ObjectMeta {
    ObjectMeta {
        name,
        size: metadata.len(),
        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get(&self, name: &str) -> Result<Bytes, ContractError> {
        let path = self.object_path(name)?;
        fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| self.io_error(name, e))
    }

    async fn put(&self, name: &str, data: Bytes) -> Result<(), ContractError> {
        let path = self.object_path(name)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.io_error(name, e))?;

        // Readers never see a half-written object
        let staging = self.dir.join(format!(".{name}.partial"));
        fs::write(&staging, &data)
            .await
            .map_err(|e| self.io_error(name, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| self.io_error(name, e))?;

        debug!(bucket = %self.bucket, object = name, size = data.len(), "Object written");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ContractError> {
        let path = self.object_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(name, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, ContractError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(prefix, e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_error(prefix, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| self.io_error(&name, e))?;
            if metadata.is_file() {
                found.push(meta_of(name, &metadata));
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>, ContractError> {
        let path = self.object_path(name)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(meta_of(name.to_string(), &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let root = tempdir().unwrap();
        let backend = LocalFsBackend::new(root.path(), "unittest");

        assert!(backend.list("").await.unwrap().is_empty());

        backend
            .put("(1:2).3.json", Bytes::from("{}\n"))
            .await
            .unwrap();
        assert!(root.path().join("unittest").join("(1:2).3.json").exists());
        assert_eq!(
            backend.get("(1:2).3.json").await.unwrap(),
            Bytes::from("{}\n")
        );

        let listed = backend.list("(1:2)").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 3);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let root = tempdir().unwrap();
        let backend = LocalFsBackend::new(root.path(), "unittest");

        assert!(matches!(
            backend.get("7.json").await,
            Err(ContractError::KeyNotFound { .. })
        ));
        assert!(backend.head("7.json").await.unwrap().is_none());
        backend.delete("7.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_names() {
        let root = tempdir().unwrap();
        let backend = LocalFsBackend::new(root.path(), "unittest");

        assert!(matches!(
            backend.put("../escape", Bytes::new()).await,
            Err(ContractError::Storage { .. })
        ));
    }
}

//! SourceReader trait - transform input abstraction
//!
//! Content is fetched lazily so a transform that fails early never pays for
//! the download.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::ContractError;

/// Readable source content
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Key the content was resolved from
    fn key(&self) -> &str;

    /// Full content
    async fn read(&self) -> Result<Bytes, ContractError>;

    /// Content split into lines, empty lines dropped
    async fn read_lines(&self) -> Result<Vec<String>, ContractError> {
        let content = self.read().await?;
        Ok(String::from_utf8_lossy(&content)
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Several sources read back to back
pub struct ConcatSource {
    key: String,
    parts: Vec<Box<dyn SourceReader>>,
}

impl ConcatSource {
    /// `key` is the smallest part key
    pub fn new(parts: Vec<Box<dyn SourceReader>>) -> Self {
        let key = parts
            .iter()
            .map(|part| part.key())
            .min()
            .unwrap_or_default()
            .to_string();
        Self { key, parts }
    }
}

#[async_trait]
impl SourceReader for ConcatSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn read(&self) -> Result<Bytes, ContractError> {
        let mut buffer = BytesMut::new();
        for part in &self.parts {
            let content = part.read().await?;
            buffer.extend_from_slice(&content);
            if !content.ends_with(b"\n") && !content.is_empty() {
                buffer.extend_from_slice(b"\n");
            }
        }
        Ok(buffer.freeze())
    }

    async fn read_lines(&self) -> Result<Vec<String>, ContractError> {
        let mut lines = Vec::new();
        for part in &self.parts {
            lines.extend(part.read_lines().await?);
        }
        Ok(lines)
    }
}

/// In-memory source, used for manual runs and tests
pub struct StaticSource {
    key: String,
    content: Bytes,
}

impl StaticSource {
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
impl SourceReader for StaticSource {
    fn key(&self) -> &str {
        &self.key
    }

    async fn read(&self) -> Result<Bytes, ContractError> {
        Ok(self.content.clone())
    }
}

//! DocumentSink trait - transform output interface
//!
//! Defines the abstract interface for destinations (object-store bucket,
//! search index, no-op, fan-out).

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::{ContractError, Document, WriteMode};

/// Destination kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Content-addressed object-store bucket
    Bucket,
    /// Search index
    SearchIndex,
    /// Discards everything
    Noop,
    /// Fan-out over two sinks
    Split,
}

/// Data output trait
///
/// All sink implementations must implement this trait. Handles are shared
/// across dispatcher workers, so every method takes `&self`.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Sink name (used for logging/metrics and destination matching)
    fn name(&self) -> &str;

    /// Sink kind
    fn kind(&self) -> SinkKind;

    /// Object-store buckets written by this sink
    fn buckets(&self) -> Vec<String> {
        Vec::new()
    }

    /// Stored keys equal to `prefix` or derived from it
    async fn keys(&self, prefix: &str) -> Result<BTreeSet<String>, ContractError>;

    /// Write a single document
    async fn add(&self, doc: Document) -> Result<(), ContractError> {
        self.extend(vec![doc]).await
    }

    /// Write documents, merging with stored siblings
    async fn extend(&self, docs: Vec<Document>) -> Result<(), ContractError> {
        self.extend_with(docs, WriteMode::Merge).await
    }

    /// Write documents with an explicit write mode
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn extend_with(&self, docs: Vec<Document>, mode: WriteMode)
        -> Result<(), ContractError>;

    /// Remove a stored key
    async fn delete_key(&self, key: &str) -> Result<(), ContractError>;

    /// Whether `key` is stored; `None` if this sink cannot tell
    async fn contains(&self, _key: &str) -> Result<Option<bool>, ContractError> {
        Ok(None)
    }
}

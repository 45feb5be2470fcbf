//! SplitSink - binary fan-out over two sinks

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use contracts::{ContractError, Document, DocumentSink, SinkKind, WriteMode};

/// Writes go to both sides; lookups are the union
pub struct SplitSink {
    name: String,
    left: Arc<dyn DocumentSink>,
    right: Arc<dyn DocumentSink>,
}

impl SplitSink {
    pub fn new(left: Arc<dyn DocumentSink>, right: Arc<dyn DocumentSink>) -> Self {
        Self {
            name: format!("{}+{}", left.name(), right.name()),
            left,
            right,
        }
    }

    /// Fold several sinks into one; `None` if there are none
    pub fn fold(
        sinks: impl IntoIterator<Item = Arc<dyn DocumentSink>>,
    ) -> Option<Arc<dyn DocumentSink>> {
        sinks
            .into_iter()
            .reduce(|left, right| Arc::new(SplitSink::new(left, right)) as Arc<dyn DocumentSink>)
    }
}

#[async_trait]
impl DocumentSink for SplitSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Split
    }

    fn buckets(&self) -> Vec<String> {
        let mut buckets = self.left.buckets();
        for bucket in self.right.buckets() {
            if !buckets.contains(&bucket) {
                buckets.push(bucket);
            }
        }
        buckets
    }

    async fn keys(&self, prefix: &str) -> Result<BTreeSet<String>, ContractError> {
        let mut keys = self.left.keys(prefix).await?;
        keys.extend(self.right.keys(prefix).await?);
        Ok(keys)
    }

    async fn extend_with(&self, docs: Vec<Document>, mode: WriteMode) -> Result<(), ContractError> {
        self.left.extend_with(docs.clone(), mode).await?;
        self.right.extend_with(docs, mode).await
    }

    async fn delete_key(&self, key: &str) -> Result<(), ContractError> {
        self.left.delete_key(key).await?;
        self.right.delete_key(key).await
    }

    /// Stored only if every side that can tell says so
    async fn contains(&self, key: &str) -> Result<Option<bool>, ContractError> {
        let left = self.left.contains(key).await?;
        let right = self.right.contains(key).await?;
        Ok(match (left, right) {
            (Some(a), Some(b)) => Some(a && b),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        })
    }
}

//! NoopSink - discards documents, logging a summary

use std::collections::BTreeSet;

use async_trait::async_trait;
use contracts::{ContractError, Document, DocumentSink, SinkKind, WriteMode};
use tracing::{debug, instrument};

/// Sink that accepts everything and stores nothing
///
/// Cannot verify keys, so `contains` is `None` and `keys` is always empty.
pub struct NoopSink {
    name: String,
}

impl NoopSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DocumentSink for NoopSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Noop
    }

    async fn keys(&self, _prefix: &str) -> Result<BTreeSet<String>, ContractError> {
        Ok(BTreeSet::new())
    }

    #[instrument(
        name = "noop_sink_extend",
        skip(self, docs),
        fields(sink = %self.name, docs = docs.len())
    )]
    async fn extend_with(&self, docs: Vec<Document>, mode: WriteMode) -> Result<(), ContractError> {
        debug!(
            sink = %self.name,
            first = docs.first().map(|d| d.id.as_str()),
            ?mode,
            "Documents discarded"
        );
        Ok(())
    }

    async fn delete_key(&self, _key: &str) -> Result<(), ContractError> {
        Ok(())
    }
}

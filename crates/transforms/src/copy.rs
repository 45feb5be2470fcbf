//! Copy - whole source rewritten under its own key

use std::collections::BTreeSet;

use async_trait::async_trait;
use contracts::{
    DocumentSink, Resources, SourceReader, StopSignal, Transform, TransformError, WriteMode,
};

use crate::record::{line_document, source_node};

/// Overwrites the destination object at the source key
///
/// Meant for BULK routes: stored siblings are replaced, not merged.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopySource;

#[async_trait]
impl Transform for CopySource {
    async fn transform(
        &self,
        source_key: &str,
        source: &dyn SourceReader,
        destination: &dyn DocumentSink,
        _resources: &Resources,
        stop: &StopSignal,
    ) -> Result<Option<BTreeSet<String>>, TransformError> {
        let origin = source_node(source_key)?;
        let docs = source
            .read_lines()
            .await?
            .iter()
            .enumerate()
            .map(|(i, line)| line_document(&origin.join(i as i64), line))
            .collect::<Result<Vec<_>, _>>()?;

        if docs.is_empty() {
            return Ok(None);
        }
        if stop.is_cancelled() {
            return Err(TransformError::shutdown());
        }

        destination.extend_with(docs, WriteMode::Overwrite).await?;
        Ok(Some(BTreeSet::from([source_key.to_string()])))
    }
}

//! Line splitting transforms

use std::collections::BTreeSet;

use async_trait::async_trait;
use contracts::{
    DocumentSink, Resources, SourceReader, StopSignal, Transform, TransformError,
};
use tracing::debug;

use crate::record::{line_document, source_node};

/// Lines per block when no size is configured
pub const DEFAULT_BLOCK_SIZE: usize = 1000;

/// One JOIN document per line, stored together under the source key
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitLines;

#[async_trait]
impl Transform for SplitLines {
    async fn transform(
        &self,
        source_key: &str,
        source: &dyn SourceReader,
        destination: &dyn DocumentSink,
        _resources: &Resources,
        stop: &StopSignal,
    ) -> Result<Option<BTreeSet<String>>, TransformError> {
        let origin = source_node(source_key)?;
        let lines = source.read_lines().await?;
        if lines.is_empty() {
            return Ok(None);
        }

        let docs = lines
            .iter()
            .enumerate()
            .map(|(i, line)| line_document(&origin.join(i as i64), line))
            .collect::<Result<Vec<_>, _>>()?;

        if stop.is_cancelled() {
            return Err(TransformError::shutdown());
        }
        destination.extend(docs).await?;

        debug!(source_key, lines = lines.len(), "Split into lines");
        Ok(Some(BTreeSet::from([source_key.to_string()])))
    }
}

/// Lines chunked into JOIN blocks; each block object holds its line documents
///
/// The block size comes from the `split_blocks.block_size` resource when
/// present, otherwise from the transform itself.
#[derive(Debug, Clone, Copy)]
pub struct SplitBlocks {
    pub block_size: usize,
}

impl Default for SplitBlocks {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl SplitBlocks {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    fn block_size(&self, resources: &Resources) -> usize {
        resources
            .get("split_blocks")
            .and_then(|settings| settings.get("block_size"))
            .and_then(|size| size.as_u64())
            .map_or(self.block_size, |size| size as usize)
            .max(1)
    }
}

#[async_trait]
impl Transform for SplitBlocks {
    async fn transform(
        &self,
        source_key: &str,
        source: &dyn SourceReader,
        destination: &dyn DocumentSink,
        resources: &Resources,
        stop: &StopSignal,
    ) -> Result<Option<BTreeSet<String>>, TransformError> {
        let origin = source_node(source_key)?;
        let lines = source.read_lines().await?;
        let block_size = self.block_size(resources);

        let mut written = BTreeSet::new();
        for (b, block) in lines.chunks(block_size).enumerate() {
            if stop.is_cancelled() {
                return Err(TransformError::shutdown());
            }

            let block_node = origin.join(b as i64);
            let docs = block
                .iter()
                .enumerate()
                .map(|(i, line)| line_document(&block_node.join(i as i64), line))
                .collect::<Result<Vec<_>, _>>()?;
            destination.extend(docs).await?;
            written.insert(etl_key::encode(&block_node));
        }

        debug!(source_key, lines = lines.len(), blocks = written.len(), "Split into blocks");
        Ok(Some(written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use contracts::{ErrorKind, StaticSource};
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_split_lines_returns_source_key() {
        let sink = RecordingSink::default();
        let source = StaticSource::new("12", "a\nb\n\nc\n");

        let keys = SplitLines
            .transform("12", &source, &sink, &Resources::default(), &StopSignal::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(keys, BTreeSet::from(["12".to_string()]));
        let ids: Vec<String> = sink.documents().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["12.0", "12.1", "12.2"]);
    }

    #[tokio::test]
    async fn test_split_lines_empty_source() {
        let sink = RecordingSink::default();
        let source = StaticSource::new("12", "");
        let keys = SplitLines
            .transform("12", &source, &sink, &Resources::default(), &StopSignal::new())
            .await
            .unwrap();
        assert!(keys.is_none());
    }

    #[tokio::test]
    async fn test_split_lines_rejects_bad_key() {
        let sink = RecordingSink::default();
        let source = StaticSource::new("tc.x", "a");
        let err = SplitLines
            .transform("tc.x", &source, &sink, &Resources::default(), &StopSignal::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongKeyFormat);
    }

    #[tokio::test]
    async fn test_split_blocks_contiguous() {
        let sink = RecordingSink::default();
        let source = StaticSource::new("1:2", "a\nb\nc\nd\ne\n");

        let keys = SplitBlocks::new(2)
            .transform("1:2", &source, &sink, &Resources::default(), &StopSignal::new())
            .await
            .unwrap()
            .unwrap();

        let keys: Vec<String> = keys.into_iter().collect();
        assert_eq!(keys, vec!["(1:2).0", "(1:2).1", "(1:2).2"]);
        assert_eq!(sink.documents().last().unwrap().id, "(1:2).2.0");
    }

    #[tokio::test]
    async fn test_split_blocks_size_from_resources() {
        let sink = RecordingSink::default();
        let source = StaticSource::new("5", "a\nb\nc\n");
        let resources = Resources::new(HashMap::from([(
            "split_blocks".to_string(),
            json!({"block_size": 10}),
        )]));

        let keys = SplitBlocks::new(1)
            .transform("5", &source, &sink, &resources, &StopSignal::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn test_split_blocks_observes_stop() {
        let sink = RecordingSink::default();
        let source = StaticSource::new("5", "a\nb\n");
        let stop = StopSignal::new();
        stop.cancel();

        let err = SplitBlocks::new(1)
            .transform("5", &source, &sink, &Resources::default(), &stop)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shutdown);
        assert!(sink.documents().is_empty());
    }
}

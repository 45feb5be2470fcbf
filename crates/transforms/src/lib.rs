//! # Transforms
//!
//! Built-in, format-agnostic transforms. Format-specific ones live outside
//! this workspace and are registered next to these.
//!
//! | id             | output object(s)            |
//! |----------------|-----------------------------|
//! | `split_lines`  | `<source>` (merge)          |
//! | `split_blocks` | `<source>.<block>` (merge)  |
//! | `copy`         | `<source>` (overwrite)      |

mod copy;
mod lines;
mod record;

use std::sync::Arc;

use contracts::TransformRegistry;

pub use copy::CopySource;
pub use lines::{SplitBlocks, SplitLines, DEFAULT_BLOCK_SIZE};

/// Registry holding every built-in transform under its id
pub fn builtin_registry() -> TransformRegistry {
    TransformRegistry::new()
        .with("split_lines", Arc::new(SplitLines))
        .with("split_blocks", Arc::new(SplitBlocks::default()))
        .with("copy", Arc::new(CopySource))
}


#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use contracts::{ContractError, Document, DocumentSink, SinkKind, WriteMode};

    /// Sink remembering every write
    #[derive(Default)]
    pub struct RecordingSink {
        pub writes: Mutex<Vec<(Vec<Document>, WriteMode)>>,
    }

    impl RecordingSink {
        pub fn documents(&self) -> Vec<Document> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .flat_map(|(docs, _)| docs.clone())
                .collect()
        }
    }

    #[async_trait]
    impl DocumentSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn kind(&self) -> SinkKind {
            SinkKind::Noop
        }

        async fn keys(&self, _prefix: &str) -> Result<BTreeSet<String>, ContractError> {
            Ok(BTreeSet::new())
        }

        async fn extend_with(
            &self,
            docs: Vec<Document>,
            mode: WriteMode,
        ) -> Result<(), ContractError> {
            self.writes.lock().unwrap().push((docs, mode));
            Ok(())
        }

        async fn delete_key(&self, _key: &str) -> Result<(), ContractError> {
            Ok(())
        }
    }
}

//! BucketSink - reconciling writes into an object-store bucket
//!
//! Documents are stored as JSON lines in the object named by their parent
//! key: `12.0.3` and `12.0.4` both live in object `12.0`. Writing a subset
//! of an object's documents keeps the siblings that were not rewritten.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use bucket_store::ObjectBucket;
use contracts::{ContractError, Document, DocumentSink, SinkKind, WriteMode};
use tracing::{debug, info, instrument, warn};

/// Sink writing documents grouped by parent key
pub struct BucketSink {
    bucket: ObjectBucket,
}

impl BucketSink {
    pub fn new(bucket: ObjectBucket) -> Self {
        Self { bucket }
    }

    pub fn bucket(&self) -> &ObjectBucket {
        &self.bucket
    }

    /// Object a document is stored in; roots are their own object
    fn object_key(doc: &Document) -> Result<String, ContractError> {
        Ok(etl_key::parent_key(&doc.id)?.unwrap_or_else(|| doc.id.clone()))
    }

    /// Stored documents of one object, by slot
    ///
    /// A missing object is empty. An object that does not parse is treated
    /// as empty too, with a warning, so the next write replaces it.
    async fn load_existing(
        &self,
        object: &str,
    ) -> Result<BTreeMap<Slot, Document>, ContractError> {
        let lines = match self.bucket.read_lines(object).await {
            Ok(lines) => lines,
            Err(ContractError::KeyNotFound { .. }) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };

        let mut existing = BTreeMap::new();
        for line in &lines {
            let parsed = serde_json::from_str::<Document>(line)
                .map_err(|e| e.to_string())
                .and_then(|doc| {
                    slot(&doc).map(|slot| (slot, doc)).map_err(|e| e.to_string())
                });
            match parsed {
                Ok((slot, doc)) => {
                    existing.insert(slot, doc);
                }
                Err(reason) => {
                    warn!(
                        bucket = %self.bucket.name(),
                        object,
                        %reason,
                        "Stored object unreadable, treating as empty"
                    );
                    return Ok(BTreeMap::new());
                }
            }
        }
        Ok(existing)
    }

    #[instrument(
        name = "bucket_sink_extend_object",
        skip(self, docs),
        fields(bucket = %self.bucket.name(), docs = docs.len())
    )]
    async fn extend_object(
        &self,
        object: &str,
        docs: Vec<Document>,
        mode: WriteMode,
    ) -> Result<(), ContractError> {
        let mut incoming = BTreeMap::new();
        for doc in docs {
            incoming.insert(slot(&doc)?, doc);
        }

        if mode == WriteMode::Merge {
            let existing = self.load_existing(object).await?;
            let mut residual = 0usize;
            let mut overlap = 0usize;
            for (slot, doc) in existing {
                if incoming.contains_key(&slot) {
                    overlap += 1;
                } else {
                    residual += 1;
                    incoming.insert(slot, doc);
                }
            }
            if residual > 0 {
                info!(object, residual, overlap, "Kept stored documents not regenerated");
            } else {
                debug!(object, overlap, "Merged with stored documents");
            }
        }

        let lines = incoming
            .values()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.bucket.write_lines(object, lines).await.map_err(|e| {
            warn!(object, error = %e, "Write failed");
            e
        })
    }
}

/// Position of a document within its object: child id, then full key
///
/// `12.0` and `0:12` share object `12` and id 0 but are different records.
type Slot = (i64, String);

fn slot(doc: &Document) -> Result<Slot, ContractError> {
    let id = etl_key::child_id(&doc.id)?;
    Ok((id, etl_key::strip_extension(&doc.id).to_string()))
}

#[async_trait]
impl DocumentSink for BucketSink {
    fn name(&self) -> &str {
        self.bucket.name()
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Bucket
    }

    fn buckets(&self) -> Vec<String> {
        vec![self.bucket.name().to_string()]
    }

    /// `prefix` itself and its join descendants (`prefix.N...`, `(prefix).N...`)
    async fn keys(&self, prefix: &str) -> Result<BTreeSet<String>, ContractError> {
        let mut found = self.bucket.keys(prefix).await?;
        found.extend(self.bucket.keys(&format!("({prefix}")).await?);
        found.retain(|key| etl_key::derives_from(key, prefix));
        Ok(found)
    }

    async fn extend_with(&self, docs: Vec<Document>, mode: WriteMode) -> Result<(), ContractError> {
        let mut groups: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for doc in docs {
            groups.entry(Self::object_key(&doc)?).or_default().push(doc);
        }

        for (object, docs) in groups {
            self.extend_object(&object, docs, mode).await?;
        }
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), ContractError> {
        self.bucket.delete_key(key).await
    }

    async fn contains(&self, key: &str) -> Result<Option<bool>, ContractError> {
        self.bucket.exists(key).await.map(Some)
    }
}

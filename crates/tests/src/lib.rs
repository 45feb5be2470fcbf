//! # Integration Tests
//!
//! End-to-end dispatcher scenarios against the in-memory queue and storage.
//!
//! Covers:
//! - settings file to running dispatcher
//! - idempotent re-processing and residual preservation
//! - retry accounting up to give-up
//! - merged routes and bulk routes

#[cfg(test)]
mod harness {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bucket_store::{ObjectBucket, StoreCatalog};
    use contracts::{
        key_message, ContractError, Document, DocumentSink, PipelineBlueprint, Resources,
        RouteSettings, SinkKind, SinkSettings, SourceReader, SourceSettings, StopSignal,
        Transform, TransformError, TransformKind, WorkQueue, WriteMode,
    };
    use work_queue::MemoryQueue;

    pub fn route(
        name: &str,
        transform: &str,
        kind: TransformKind,
        destination: SinkSettings,
    ) -> RouteSettings {
        RouteSettings {
            name: name.into(),
            source: SourceSettings {
                bucket: "raw".into(),
                extension: "json".into(),
            },
            transform: transform.into(),
            transform_kind: kind,
            destination,
            notify: Vec::new(),
        }
    }

    pub fn bucket_dest(bucket: &str) -> SinkSettings {
        SinkSettings::Bucket {
            bucket: bucket.into(),
            extension: "json".into(),
        }
    }

    pub fn blueprint(routes: Vec<RouteSettings>) -> PipelineBlueprint {
        PipelineBlueprint {
            version: Default::default(),
            dispatcher: Default::default(),
            queue: Default::default(),
            storage: Default::default(),
            routes,
            resources: HashMap::new(),
        }
    }

    pub fn queue() -> Arc<MemoryQueue> {
        Arc::new(MemoryQueue::new("etl", Duration::ZERO))
    }

    /// Catalog with `raw/<key>` holding `lines`
    pub async fn catalog_with_source(key: &str, lines: &[&str]) -> Arc<StoreCatalog> {
        let catalog = Arc::new(StoreCatalog::in_memory());
        catalog
            .bucket("raw", "json")
            .unwrap()
            .write_lines(key, lines.to_vec())
            .await
            .unwrap();
        catalog
    }

    pub async fn enqueue(queue: &MemoryQueue, key: &str) {
        queue.add(key_message("raw", key).unwrap()).await.unwrap();
    }

    /// Documents stored in one object, by id
    pub async fn stored(bucket: &ObjectBucket, object: &str) -> Vec<Document> {
        bucket
            .read_lines(object)
            .await
            .unwrap()
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Counts calls before delegating
    pub struct Counting {
        inner: Arc<dyn Transform>,
        pub calls: AtomicUsize,
    }

    impl Counting {
        pub fn new(inner: Arc<dyn Transform>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transform for Counting {
        async fn transform(
            &self,
            source_key: &str,
            source: &dyn SourceReader,
            destination: &dyn DocumentSink,
            resources: &Resources,
            stop: &StopSignal,
        ) -> Result<Option<BTreeSet<String>>, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .transform(source_key, source, destination, resources, stop)
                .await
        }
    }

    /// Always fails with a transient error
    pub struct Flaky;

    #[async_trait]
    impl Transform for Flaky {
        async fn transform(
            &self,
            _source_key: &str,
            _source: &dyn SourceReader,
            _destination: &dyn DocumentSink,
            _resources: &Resources,
            _stop: &StopSignal,
        ) -> Result<Option<BTreeSet<String>>, TransformError> {
            Err(TransformError::transient("destination busy"))
        }
    }

    /// Sink counting prefix lookups
    #[derive(Default)]
    pub struct SpySink {
        pub key_lookups: AtomicUsize,
    }

    #[async_trait]
    impl DocumentSink for SpySink {
        fn name(&self) -> &str {
            "spy"
        }

        fn kind(&self) -> SinkKind {
            SinkKind::Noop
        }

        async fn keys(&self, _prefix: &str) -> Result<BTreeSet<String>, ContractError> {
            self.key_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(BTreeSet::new())
        }

        async fn extend_with(
            &self,
            _docs: Vec<Document>,
            _mode: WriteMode,
        ) -> Result<(), ContractError> {
            Ok(())
        }

        async fn delete_key(&self, _key: &str) -> Result<(), ContractError> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod contract_tests {
    use config_loader::ConfigLoader;
    use contracts::TransformKind;
    use dispatcher::DispatcherBuilder;

    use crate::harness::queue;

    const SETTINGS: &str = r#"
[dispatcher]
workers = 2

[queue]
name = "etl"

[[routes]]
name = "raw-lines"
transform = "split_lines"
source = { bucket = "raw" }
destination = { type = "bucket", bucket = "lines" }
notify = [{ queue = "etl", bucket = "lines" }]

[[routes]]
name = "raw-archive"
transform = "split_lines"
source = { bucket = "raw" }
destination = { type = "bucket", bucket = "archive" }

[[routes]]
name = "raw-copy"
transform = "copy"
transform_kind = "bulk"
source = { bucket = "raw" }
destination = { type = "noop", name = "void" }
"#;

    #[test]
    fn test_settings_build_a_dispatcher() {
        let blueprint = ConfigLoader::load_from_str(SETTINGS, config_loader::ConfigFormat::Toml)
            .unwrap();
        let dispatcher = DispatcherBuilder::new(blueprint, queue())
            .transforms(transforms::builtin_registry())
            .build()
            .unwrap();

        let routes = dispatcher.routes().routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].name(), "raw-lines+raw-archive");
        assert_eq!(routes[0].notify().len(), 1);
        assert_eq!(routes[1].kind(), TransformKind::Bulk);
        assert_eq!(routes[1].sink().name(), "void");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use contracts::{
        Document, DocumentSink, SinkSettings, StopSignal, TransformKind, TransformRegistry,
        WorkQueue,
    };
    use dispatcher::{BucketSink, DispatcherBuilder, Outcome};
    use serde_json::json;
    use transforms::{SplitBlocks, SplitLines};

    use crate::harness::*;

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let catalog = catalog_with_source("12", &[r#"{"t":"a"}"#, r#"{"t":"b"}"#]).await;
        let queue = queue();
        let dispatcher = DispatcherBuilder::new(
            blueprint(vec![route(
                "blocks",
                "split_blocks",
                TransformKind::Normal,
                bucket_dest("blocks"),
            )]),
            Arc::clone(&queue),
        )
        .transforms(TransformRegistry::new().with("split_blocks", Arc::new(SplitBlocks::new(1))))
        .catalog(Arc::clone(&catalog))
        .build()
        .unwrap();
        let blocks = catalog.bucket("blocks", "json").unwrap();

        enqueue(&queue, "12").await;
        dispatcher.run(&StopSignal::new()).await.unwrap();
        let first_keys = blocks.keys("12").await.unwrap();
        let first_docs = stored(&blocks, "12.1").await;

        enqueue(&queue, "12").await;
        let snapshot = dispatcher.run(&StopSignal::new()).await.unwrap();

        assert_eq!(
            first_keys,
            BTreeSet::from(["12.0".to_string(), "12.1".to_string()])
        );
        assert_eq!(blocks.keys("12").await.unwrap(), first_keys);
        assert_eq!(stored(&blocks, "12.1").await, first_docs);
        assert_eq!(snapshot.rejected, 0);
        assert!(queue.stats().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_keeps_siblings_it_did_not_regenerate() {
        let catalog = catalog_with_source("12", &["first", "second"]).await;
        let lines = catalog.bucket("lines", "json").unwrap();
        BucketSink::new(lines.clone())
            .extend(vec![
                Document::new("12.0", json!({"line": "old a"})),
                Document::new("12.1", json!({"line": "old b"})),
                Document::new("12.2", json!({"line": "old c"})),
            ])
            .await
            .unwrap();

        let queue = queue();
        let dispatcher = DispatcherBuilder::new(
            blueprint(vec![route(
                "lines",
                "split_lines",
                TransformKind::Normal,
                bucket_dest("lines"),
            )]),
            Arc::clone(&queue),
        )
        .transforms(TransformRegistry::new().with("split_lines", Arc::new(SplitLines)))
        .catalog(Arc::clone(&catalog))
        .build()
        .unwrap();

        enqueue(&queue, "12").await;
        let snapshot = dispatcher.run(&StopSignal::new()).await.unwrap();
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.unrouted, 1, "re-enqueued key has no route");

        let docs = stored(&lines, "12").await;
        let ids: Vec<&str> = docs.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["12.0", "12.1", "12.2"]);
        assert_eq!(docs[0].value["line"], "first");
        assert_eq!(docs[1].value["line"], "second");
        assert_eq!(docs[2].value["line"], "old c");
    }

    #[tokio::test]
    async fn test_attempts_grow_by_one_until_dropped() {
        let catalog = catalog_with_source("12", &["x"]).await;
        let queue = queue();
        let flaky = Counting::new(Arc::new(Flaky));
        let dispatcher = DispatcherBuilder::new(
            blueprint(vec![route(
                "flaky",
                "flaky",
                TransformKind::Normal,
                bucket_dest("out"),
            )]),
            Arc::clone(&queue),
        )
        .transforms(TransformRegistry::new().with("flaky", flaky.clone()))
        .catalog(catalog)
        .build()
        .unwrap();

        enqueue(&queue, "12").await;
        let stop = StopSignal::new();
        let mut seen = Vec::new();
        let mut outcomes = Vec::new();
        while let Some(delivery) = queue.pop(None).await.unwrap() {
            seen.push(
                delivery.message["previous_attempts"]
                    .as_u64()
                    .unwrap_or_default(),
            );
            outcomes.push(dispatcher.dispatch(delivery, &stop).await);
        }

        assert_eq!(seen, (0..=11).collect::<Vec<u64>>());
        assert_eq!(outcomes.iter().filter(|o| **o == Outcome::Requeued).count(), 11);
        assert_eq!(outcomes.last(), Some(&Outcome::Rejected));
        assert_eq!(flaky.calls(), 12);
        assert!(queue.stats().unwrap().is_empty());

        // Cycles arriving with 3..=10 attempts are requeued with a warning
        let snapshot = dispatcher.metrics();
        assert_eq!(snapshot.warned, 8);
        assert_eq!(snapshot.rejected, 1);
    }

    #[tokio::test]
    async fn test_merged_routes_run_the_transform_once() {
        let catalog = catalog_with_source("7", &["a", "b", "c"]).await;
        let queue = queue();
        let split = Counting::new(Arc::new(SplitLines));
        let dispatcher = DispatcherBuilder::new(
            blueprint(vec![
                route("to-a", "split", TransformKind::Normal, bucket_dest("out-a")),
                route("to-b", "split", TransformKind::Normal, bucket_dest("out-b")),
            ]),
            Arc::clone(&queue),
        )
        .transforms(TransformRegistry::new().with("split", split.clone()))
        .catalog(Arc::clone(&catalog))
        .build()
        .unwrap();

        enqueue(&queue, "7").await;
        let outcome = dispatcher
            .dispatch(queue.pop(None).await.unwrap().unwrap(), &StopSignal::new())
            .await;

        assert_eq!(outcome, Outcome::Committed);
        assert_eq!(split.calls(), 1);
        for bucket in ["out-a", "out-b"] {
            let docs = stored(&catalog.bucket(bucket, "json").unwrap(), "7").await;
            assert_eq!(docs.len(), 3, "bucket {bucket}");
        }

        // Re-enqueued once per destination bucket
        let pending = queue.pending().unwrap();
        let buckets: BTreeSet<&str> = pending
            .iter()
            .filter_map(|message| message["bucket"].as_str())
            .collect();
        assert_eq!(buckets, BTreeSet::from(["out-a", "out-b"]));
    }

    #[tokio::test]
    async fn test_destination_narrows_merged_route() {
        let catalog = catalog_with_source("7", &["a"]).await;
        let queue = queue();
        let dispatcher = DispatcherBuilder::new(
            blueprint(vec![
                route("to-a", "split", TransformKind::Normal, bucket_dest("out-a")),
                route("to-b", "split", TransformKind::Normal, bucket_dest("out-b")),
            ]),
            Arc::clone(&queue),
        )
        .transforms(TransformRegistry::new().with("split", Arc::new(SplitLines)))
        .catalog(Arc::clone(&catalog))
        .build()
        .unwrap();

        let mut message = contracts::key_message("raw", "7").unwrap();
        message["destination"] = json!("out-b");
        queue.add(message).await.unwrap();
        let outcome = dispatcher
            .dispatch(queue.pop(None).await.unwrap().unwrap(), &StopSignal::new())
            .await;

        assert_eq!(outcome, Outcome::Committed);
        assert!(!catalog.bucket("out-a", "json").unwrap().exists("7").await.unwrap());
        assert!(catalog.bucket("out-b", "json").unwrap().exists("7").await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_routes_never_look_up_prefixes() {
        let catalog = catalog_with_source("3", &["a"]).await;
        let spy_settings = SinkSettings::Noop { name: "spy".into() };

        for (kind, expected_lookups) in [(TransformKind::Bulk, 0), (TransformKind::Normal, 1)] {
            let queue = queue();
            let spy = Arc::new(SpySink::default());
            let dispatcher = DispatcherBuilder::new(
                blueprint(vec![route("spy", "copy", kind, spy_settings.clone())]),
                Arc::clone(&queue),
            )
            .transforms(transforms::builtin_registry())
            .catalog(Arc::clone(&catalog))
            .sink(spy_settings.clone(), spy.clone())
            .build()
            .unwrap();

            enqueue(&queue, "3").await;
            let snapshot = dispatcher.run(&StopSignal::new()).await.unwrap();

            assert_eq!(snapshot.committed, 1, "{kind:?}");
            assert_eq!(
                spy.key_lookups.load(Ordering::SeqCst),
                expected_lookups,
                "{kind:?}"
            );
        }
    }
}

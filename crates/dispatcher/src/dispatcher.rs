//! Dispatcher - pulls work items, runs routes, applies the retry policy
//!
//! One item goes `popped -> matched -> transformed` and ends committed,
//! requeued or rejected. Every route matching the item must succeed; the
//! first failure stops the item and hands it to the retry policy.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bucket_store::{BucketSource, StoreCatalog};
use contracts::{
    key_message, ConcatSource, ContractError, Delivery, DispatcherSettings, DocumentSink,
    ErrorKind, Notifier, PipelineBlueprint, Resources, SinkSettings, SourceReader, StopSignal,
    TransformError, TransformKind, TransformRegistry, WorkItem, WorkQueue,
};
use tracing::{debug, error, info, instrument, warn};
use work_queue::QueueNotifier;

use crate::error::DispatcherError;
use crate::handle::WorkerHandle;
use crate::metrics::{DispatchMetrics, MetricsSnapshot, Outcome};
use crate::registry::SinkRegistry;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::routes::{NotifierFactory, Route, RouteTable};

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<Q> {
    blueprint: PipelineBlueprint,
    queue: Arc<Q>,
    notify_queues: HashMap<String, Arc<Q>>,
    transforms: TransformRegistry,
    catalog: Option<Arc<StoreCatalog>>,
    sinks: Vec<(SinkSettings, Arc<dyn DocumentSink>)>,
}

impl<Q> DispatcherBuilder<Q>
where
    Q: WorkQueue + Sync + 'static,
{
    /// `queue` is the shared work queue; it also serves notify targets
    /// naming it
    pub fn new(blueprint: PipelineBlueprint, queue: Arc<Q>) -> Self {
        let mut notify_queues = HashMap::new();
        notify_queues.insert(queue.name().to_string(), Arc::clone(&queue));
        Self {
            blueprint,
            queue,
            notify_queues,
            transforms: TransformRegistry::new(),
            catalog: None,
            sinks: Vec::new(),
        }
    }

    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Storage to use instead of one built from the blueprint
    pub fn catalog(mut self, catalog: Arc<StoreCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Make a queue available as a notify target
    pub fn notify_queue(mut self, queue: Arc<Q>) -> Self {
        self.notify_queues
            .insert(queue.name().to_string(), queue);
        self
    }

    /// Pre-built sink for routes whose destination equals `settings`
    pub fn sink(mut self, settings: SinkSettings, sink: Arc<dyn DocumentSink>) -> Self {
        self.sinks.push((settings, sink));
        self
    }

    /// Resolve routes and sinks
    ///
    /// # Errors
    /// Unknown transforms, unknown notify queues and sink creation failures
    /// are reported here, before any item is popped.
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(queue = %self.queue.name(), routes = self.blueprint.routes.len())
    )]
    pub fn build(self) -> Result<Dispatcher<Q>, DispatcherError> {
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(StoreCatalog::new(self.blueprint.storage.clone())));

        let sinks = SinkRegistry::new(Arc::clone(&catalog));
        for (settings, sink) in self.sinks {
            sinks.insert(settings, sink)?;
        }

        let notifiers = QueueNotifiers {
            queues: self.notify_queues,
        };
        let routes =
            RouteTable::build(&self.blueprint.routes, &self.transforms, &sinks, &notifiers)?;

        info!(
            routes = routes.len(),
            sinks = sinks.len(),
            workers = self.blueprint.dispatcher.workers,
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            shared: Arc::new(Shared {
                queue: self.queue,
                routes,
                catalog,
                sinks,
                resources: Resources::new(self.blueprint.resources),
                policy: RetryPolicy::from_settings(&self.blueprint.dispatcher),
                settings: self.blueprint.dispatcher,
                metrics: DispatchMetrics::new(),
            }),
        })
    }
}

/// Notify targets backed by the queues handed to the builder
struct QueueNotifiers<Q> {
    queues: HashMap<String, Arc<Q>>,
}

impl<Q> NotifierFactory for QueueNotifiers<Q>
where
    Q: WorkQueue + Sync + 'static,
{
    fn notifier(
        &self,
        route: &str,
        queue: &str,
        bucket: &str,
    ) -> Result<Arc<dyn Notifier>, DispatcherError> {
        let queue = self
            .queues
            .get(queue)
            .ok_or_else(|| DispatcherError::UnknownQueue {
                route: route.to_string(),
                queue: queue.to_string(),
            })?;
        Ok(Arc::new(QueueNotifier::new(Arc::clone(queue), bucket)))
    }
}

/// State shared by every worker
pub(crate) struct Shared<Q> {
    pub(crate) queue: Arc<Q>,
    routes: RouteTable,
    catalog: Arc<StoreCatalog>,
    sinks: SinkRegistry,
    resources: Resources,
    policy: RetryPolicy,
    pub(crate) settings: DispatcherSettings,
    metrics: DispatchMetrics,
}

/// Work-queue dispatcher
pub struct Dispatcher<Q> {
    shared: Arc<Shared<Q>>,
}

impl<Q> fmt::Debug for Dispatcher<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.shared.routes)
            .field("sinks", &self.shared.sinks.len())
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl<Q> Dispatcher<Q>
where
    Q: WorkQueue + Sync + 'static,
{
    pub fn routes(&self) -> &RouteTable {
        &self.shared.routes
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.shared.sinks
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Start the configured number of workers
    pub fn spawn(&self, stop: &StopSignal) -> Vec<WorkerHandle> {
        let workers = self.shared.settings.workers.max(1);
        (0..workers)
            .map(|id| WorkerHandle::spawn(id, Arc::clone(&self.shared), stop.clone()))
            .collect()
    }

    /// Run workers until the queue drains (or `stop` fires) and summarize
    ///
    /// # Errors
    /// `Worker` if a worker task panicked. The remaining workers are still
    /// joined first.
    #[instrument(name = "dispatcher_run", skip_all, fields(queue = %self.shared.queue.name()))]
    pub async fn run(&self, stop: &StopSignal) -> Result<MetricsSnapshot, DispatcherError> {
        let handles = self.spawn(stop);
        info!(
            workers = handles.len(),
            wait_forever = self.shared.settings.wait_forever,
            "Dispatcher started"
        );

        let mut failure = None;
        for handle in handles {
            if let Err(e) = handle.join().await {
                error!(error = %e, "Worker failed");
                failure.get_or_insert(e);
            }
        }

        let snapshot = self.metrics();
        info!(
            popped = snapshot.popped,
            committed = snapshot.committed,
            requeued = snapshot.requeued,
            rejected = snapshot.rejected,
            "Dispatcher finished"
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(snapshot),
        }
    }

    /// Process one popped message to completion
    pub async fn dispatch(&self, delivery: Delivery, stop: &StopSignal) -> Outcome {
        self.shared.dispatch(delivery, stop).await
    }
}

impl<Q> Shared<Q>
where
    Q: WorkQueue + Sync + 'static,
{
    #[instrument(name = "dispatch_item", skip_all, fields(receipt = delivery.receipt))]
    pub(crate) async fn dispatch(&self, delivery: Delivery, stop: &StopSignal) -> Outcome {
        self.metrics.inc_popped();
        let outcome = self.process(delivery, stop).await;
        self.metrics.record_outcome(outcome);
        outcome
    }

    async fn process(&self, delivery: Delivery, stop: &StopSignal) -> Outcome {
        let item = match WorkItem::from_value(&delivery.message) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, message = %delivery.message, "Dropping malformed work item");
                self.commit(delivery).await;
                return Outcome::Malformed;
            }
        };

        let routes = self.routes.matching(&item);
        if routes.is_empty() {
            return self.unrouted(delivery, &item).await;
        }

        for route in &routes {
            let result = if stop.is_cancelled() {
                Err(TransformError::shutdown())
            } else {
                self.run_route(route, &item, stop).await
            };

            if let Err(e) = result {
                return self.fail(delivery, item, route.name(), e).await;
            }
        }

        self.commit(delivery).await;
        debug!(
            bucket = %item.bucket,
            key = %item.display_key(),
            routes = routes.len(),
            "Item committed"
        );
        Outcome::Committed
    }

    async fn unrouted(&self, delivery: Delivery, item: &WorkItem) -> Outcome {
        if self.settings.keep_unknown_on_queue {
            info!(
                bucket = %item.bucket,
                key = %item.display_key(),
                "No route for item, leaving it on the queue"
            );
            if let Err(e) = self.queue.rollback(delivery).await {
                error!(error = %e, "Rollback failed");
            }
        } else {
            info!(
                bucket = %item.bucket,
                key = %item.display_key(),
                "No route for item, discarding"
            );
            self.commit(delivery).await;
        }
        Outcome::Unrouted
    }

    /// Run one route for one item
    #[instrument(
        name = "dispatch_route",
        skip_all,
        fields(route = %route.name(), bucket = %item.bucket, key = %item.display_key())
    )]
    async fn run_route(
        &self,
        route: &Route,
        item: &WorkItem,
        stop: &StopSignal,
    ) -> Result<(), TransformError> {
        let keys = item.source_keys()?;
        for key in &keys {
            etl_key::validate(key).map_err(|e| TransformError::wrong_key_format(e.to_string()))?;
        }

        let source = self.open_source(route, &keys).await?;
        let source_key = source.key().to_string();
        let sink = route.sink();

        let old_keys = match route.kind() {
            TransformKind::Normal => sink.keys(&source_key).await?,
            TransformKind::Bulk => BTreeSet::new(),
        };

        let started = Instant::now();
        let result = route
            .transform()
            .transform(
                &source_key,
                source.as_ref(),
                sink.as_ref(),
                &self.resources,
                stop,
            )
            .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_route(route.name(), latency_ms, result.is_ok());
        let new_keys = result?.unwrap_or_default();

        if new_keys.is_empty() {
            if old_keys.is_empty() {
                info!(source_key = %source_key, "Transform produced nothing");
            } else {
                warn!(
                    source_key = %source_key,
                    previous = old_keys.len(),
                    "Transform produced nothing where earlier runs produced keys"
                );
            }
        } else {
            verify_keys(sink.as_ref(), &source_key, &new_keys).await?;
        }

        for key in &new_keys {
            for target in route.notify() {
                target.notify(key).await?;
            }
        }

        let orphaned: Vec<&String> = old_keys.difference(&new_keys).collect();
        if !orphaned.is_empty() {
            warn!(
                source_key = %source_key,
                count = orphaned.len(),
                first = %orphaned[0],
                "Stored keys not regenerated, leaving them in place"
            );
        }
        observability::record_keys(route.name(), new_keys.len(), orphaned.len());

        // Bucket destinations always feed the work queue; a non-bucket
        // destination relies on its notify targets when it has any
        if route.notify().is_empty() || !sink.buckets().is_empty() {
            let keys: BTreeSet<&String> = old_keys.union(&new_keys).collect();
            self.reenqueue(sink.as_ref(), &keys).await?;
        }

        debug!(
            source_key = %source_key,
            written = new_keys.len(),
            latency_ms,
            "Route done"
        );
        Ok(())
    }

    /// Reader over the item's key(s) in the route's source bucket
    async fn open_source(
        &self,
        route: &Route,
        keys: &[String],
    ) -> Result<Box<dyn SourceReader>, ContractError> {
        let bucket = self
            .catalog
            .bucket(route.source_bucket(), route.source_extension())?;

        if let [key] = keys {
            return Ok(Box::new(BucketSource::open(&bucket, key).await?));
        }

        let mut parts: Vec<Box<dyn SourceReader>> = Vec::with_capacity(keys.len());
        for key in keys {
            parts.push(Box::new(BucketSource::open(&bucket, key).await?));
        }
        Ok(Box::new(ConcatSource::new(parts)))
    }

    /// Post keys back to the work queue for the destination's buckets
    async fn reenqueue(
        &self,
        sink: &dyn DocumentSink,
        keys: &BTreeSet<&String>,
    ) -> Result<(), ContractError> {
        for bucket in sink.buckets() {
            for key in keys {
                self.queue.add(key_message(&bucket, key)?).await?;
            }
            debug!(bucket = %bucket, count = keys.len(), "Keys re-enqueued");
        }
        Ok(())
    }

    async fn fail(
        &self,
        delivery: Delivery,
        item: WorkItem,
        route: &str,
        error: TransformError,
    ) -> Outcome {
        match error.kind() {
            ErrorKind::Shutdown => {
                info!(route, key = %item.display_key(), "Stopping mid-item, rolling back");
                if let Err(e) = self.queue.rollback(delivery).await {
                    error!(error = %e, "Rollback failed");
                }
                Outcome::Shutdown
            }
            ErrorKind::WrongKeyFormat => {
                warn!(
                    route,
                    bucket = %item.bucket,
                    key = %item.display_key(),
                    error = %error,
                    "Dropping item with malformed key"
                );
                observability::record_rejected(error.kind().as_str());
                self.commit(delivery).await;
                Outcome::Rejected
            }
            ErrorKind::KeyNotFound
            | ErrorKind::MultipleKeys
            | ErrorKind::NonContiguousIds
            | ErrorKind::Transient
            | ErrorKind::Fatal => self.retry(delivery, item, route, error).await,
        }
    }

    async fn retry(
        &self,
        delivery: Delivery,
        mut item: WorkItem,
        route: &str,
        error: TransformError,
    ) -> Outcome {
        let attempts = item.previous_attempts;
        let kind = error.kind();
        let key = item.display_key();
        let recognized = kind.is_recognized();

        let decision = self.policy.decide(attempts);
        if decision == RetryDecision::RequeueWithWarning {
            self.metrics.inc_warned();
        }
        match decision {
            RetryDecision::Reject => {
                error!(
                    alert = true,
                    route,
                    bucket = %item.bucket,
                    key = %key,
                    attempts,
                    kind = %kind,
                    error = %error,
                    "Giving up on item"
                );
                observability::record_rejected(kind.as_str());
                self.commit(delivery).await;
                return Outcome::Rejected;
            }
            RetryDecision::RequeueQuietly if recognized => {
                debug!(route, key = %key, attempts, kind = %kind, error = %error, "Requeueing");
            }
            RetryDecision::RequeueQuietly => {
                info!(route, key = %key, attempts, kind = %kind, error = %error, "Requeueing");
            }
            RetryDecision::RequeueWithWarning if recognized => {
                warn!(route, key = %key, attempts, kind = %kind, error = %error, "Requeueing");
            }
            RetryDecision::RequeueWithWarning => {
                error!(route, key = %key, attempts, kind = %kind, error = %error, "Requeueing");
            }
        }

        item.previous_attempts += 1;
        self.requeue(delivery, &item).await
    }

    /// Add the updated item, then commit the original
    async fn requeue(&self, delivery: Delivery, item: &WorkItem) -> Outcome {
        let added = match item.to_value() {
            Ok(message) => self.queue.add(message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = added {
            error!(
                fatal = true,
                key = %item.display_key(),
                error = %e,
                "Requeue failed, rolling back"
            );
            if let Err(e) = self.queue.rollback(delivery).await {
                error!(error = %e, "Rollback failed");
            }
            return Outcome::RolledBack;
        }

        self.commit(delivery).await;
        observability::record_requeue(item.previous_attempts);
        Outcome::Requeued
    }

    async fn commit(&self, delivery: Delivery) {
        let receipt = delivery.receipt;
        if let Err(e) = self.queue.commit(delivery).await {
            error!(receipt, error = %e, "Commit failed");
        }
    }
}

/// Check that written keys exist and their ids run `0..n`
///
/// A sink that cannot tell whether a key exists skips the check.
async fn verify_keys(
    sink: &dyn DocumentSink,
    source_key: &str,
    new_keys: &BTreeSet<String>,
) -> Result<(), TransformError> {
    if new_keys.len() == 1 && new_keys.contains(source_key) {
        return Ok(());
    }
    let Some(first) = new_keys.iter().next() else {
        return Ok(());
    };

    match sink.contains(first).await? {
        None => return Ok(()),
        Some(false) => {
            return Err(ContractError::key_not_found(sink.name(), first.as_str()).into());
        }
        Some(true) => {}
    }

    let mut ids = new_keys
        .iter()
        .map(|key| etl_key::child_id(key))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransformError::wrong_key_format(e.to_string()))?;
    ids.sort_unstable();

    if let Some((expected, found)) = ids
        .iter()
        .enumerate()
        .map(|(expected, id)| (expected as i64, *id))
        .find(|(expected, id)| expected != id)
    {
        return Err(TransformError::non_contiguous(format!(
            "{} keys under '{source_key}': expected id {expected}, found {found}",
            new_keys.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bucket_store::MemoryBackend;
    use contracts::{
        Document, NotifySettings, RouteSettings, SourceSettings, StorageSettings, WriteMode,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use work_queue::MemoryQueue;

    /// Writes `<source>.0` and `<source>.1`, or fails with a fixed kind
    struct TwoRecords {
        fail_with: Option<ErrorKind>,
        calls: AtomicUsize,
    }

    impl TwoRecords {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail_with: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(kind: ErrorKind) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Some(kind),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl contracts::Transform for TwoRecords {
        async fn transform(
            &self,
            source_key: &str,
            source: &dyn SourceReader,
            destination: &dyn DocumentSink,
            _resources: &Resources,
            _stop: &StopSignal,
        ) -> Result<Option<BTreeSet<String>>, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(kind) = self.fail_with {
                return Err(TransformError::new(kind, "scripted failure"));
            }
            source.read().await?;
            destination
                .extend_with(
                    vec![
                        Document::new(format!("{source_key}.0"), json!({"n": 0})),
                        Document::new(format!("{source_key}.1"), json!({"n": 1})),
                    ],
                    WriteMode::Merge,
                )
                .await?;
            Ok(Some(BTreeSet::from([source_key.to_string()])))
        }
    }

    fn blueprint(routes: Vec<RouteSettings>) -> PipelineBlueprint {
        PipelineBlueprint {
            version: Default::default(),
            dispatcher: DispatcherSettings::default(),
            queue: Default::default(),
            storage: StorageSettings::Memory,
            routes,
            resources: HashMap::new(),
        }
    }

    fn route(name: &str, destination: &str) -> RouteSettings {
        RouteSettings {
            name: name.into(),
            source: SourceSettings {
                bucket: "raw".into(),
                extension: "json".into(),
            },
            transform: "two".into(),
            transform_kind: TransformKind::Normal,
            destination: SinkSettings::Bucket {
                bucket: destination.into(),
                extension: "json".into(),
            },
            notify: vec![NotifySettings {
                queue: "etl".into(),
                bucket: destination.into(),
            }],
        }
    }

    struct Fixture {
        queue: Arc<MemoryQueue>,
        catalog: Arc<StoreCatalog>,
        dispatcher: Dispatcher<MemoryQueue>,
    }

    async fn fixture(transform: Arc<TwoRecords>, routes: Vec<RouteSettings>) -> Fixture {
        fixture_with(transform, blueprint(routes)).await
    }

    async fn fixture_with(transform: Arc<TwoRecords>, blueprint: PipelineBlueprint) -> Fixture {
        let queue = Arc::new(MemoryQueue::new("etl", Duration::ZERO));
        let catalog = seeded_catalog().await;

        let dispatcher = DispatcherBuilder::new(blueprint, Arc::clone(&queue))
            .transforms(TransformRegistry::new().with("two", transform))
            .catalog(Arc::clone(&catalog))
            .build()
            .unwrap();

        Fixture {
            queue,
            catalog,
            dispatcher,
        }
    }

    /// Catalog whose `raw` bucket holds object `12`
    async fn seeded_catalog() -> Arc<StoreCatalog> {
        let catalog = Arc::new(StoreCatalog::in_memory());
        catalog
            .insert(Arc::new(MemoryBackend::new("raw")))
            .unwrap();
        catalog
            .bucket("raw", "json")
            .unwrap()
            .write_lines("12", ["{\"a\":1}"])
            .await
            .unwrap();
        catalog
    }

    async fn pop(queue: &MemoryQueue) -> Delivery {
        queue.pop(None).await.unwrap().expect("queue empty")
    }

    #[tokio::test]
    async fn test_success_commits_and_notifies() {
        let f = fixture(TwoRecords::ok(), vec![route("lines", "out")]).await;
        f.queue
            .add(key_message("raw", "12").unwrap())
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Committed);

        let out = f.catalog.bucket("out", "json").unwrap();
        assert_eq!(out.read_lines("12").await.unwrap().len(), 2);

        // One from the notify target, one re-enqueued for the bucket
        let pending = f.queue.pending().unwrap();
        assert_eq!(pending.len(), 2);
        for message in &pending {
            assert_eq!(message["bucket"], "out");
            assert_eq!(message["key"], "12");
        }
        assert_eq!(f.queue.stats().unwrap().in_flight, 0);
    }

    #[tokio::test]
    async fn test_bucket_destination_with_notify_reenqueues_old_keys() {
        let f = fixture(TwoRecords::ok(), vec![route("lines", "out")]).await;
        crate::sinks::BucketSink::new(f.catalog.bucket("out", "json").unwrap())
            .add(Document::new("12.5.0", json!({"n": 5})))
            .await
            .unwrap();
        f.queue
            .add(key_message("raw", "12").unwrap())
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Committed);

        let keys: Vec<String> = f
            .queue
            .pending()
            .unwrap()
            .iter()
            .map(|message| message["key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys.iter().filter(|key| *key == "12").count(), 2);
        assert_eq!(keys.iter().filter(|key| *key == "12.5").count(), 1);
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_requeues_with_incremented_attempts() {
        let f = fixture(
            TwoRecords::failing(ErrorKind::Transient),
            vec![route("lines", "out")],
        )
        .await;
        f.queue
            .add(key_message("raw", "12").unwrap())
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Requeued);

        let requeued = pop(&f.queue).await;
        assert_eq!(requeued.message["previous_attempts"], 1);
    }

    #[tokio::test]
    async fn test_max_attempts_is_still_requeued() {
        let f = fixture(
            TwoRecords::failing(ErrorKind::Transient),
            vec![route("lines", "out")],
        )
        .await;
        let mut message = key_message("raw", "12").unwrap();
        message["previous_attempts"] = json!(10);
        f.queue.add(message).await.unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Requeued);
        assert_eq!(pop(&f.queue).await.message["previous_attempts"], 11);
        assert_eq!(f.dispatcher.metrics().warned, 1);
    }

    #[tokio::test]
    async fn test_rejects_past_max_attempts() {
        let f = fixture(
            TwoRecords::failing(ErrorKind::Fatal),
            vec![route("lines", "out")],
        )
        .await;
        let mut message = key_message("raw", "12").unwrap();
        message["previous_attempts"] = json!(11);
        f.queue.add(message).await.unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Rejected);
        assert!(f.queue.stats().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_warns_from_min_attempts_on() {
        let f = fixture(
            TwoRecords::failing(ErrorKind::Transient),
            vec![route("lines", "out")],
        )
        .await;
        let stop = StopSignal::new();

        for attempts in 0..=2u32 {
            let mut message = key_message("raw", "12").unwrap();
            message["previous_attempts"] = json!(attempts);
            f.queue.add(message).await.unwrap();
            f.dispatcher.dispatch(pop(&f.queue).await, &stop).await;
            pop(&f.queue).await;
        }
        assert_eq!(f.dispatcher.metrics().warned, 0);

        let mut message = key_message("raw", "12").unwrap();
        message["previous_attempts"] = json!(3);
        f.queue.add(message).await.unwrap();
        f.dispatcher.dispatch(pop(&f.queue).await, &stop).await;
        assert_eq!(f.dispatcher.metrics().warned, 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_retried() {
        let transform = TwoRecords::ok();
        let f = fixture(Arc::clone(&transform), vec![route("lines", "out")]).await;
        f.queue
            .add(key_message("raw", "99").unwrap())
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Requeued);
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_key_is_dropped() {
        let transform = TwoRecords::ok();
        let f = fixture(Arc::clone(&transform), vec![route("lines", "out")]).await;
        f.queue
            .add(key_message("raw", "tc.x").unwrap())
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Rejected);
        assert!(f.queue.stats().unwrap().is_empty());
        assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_and_unrouted_are_committed() {
        let f = fixture(TwoRecords::ok(), vec![route("lines", "out")]).await;
        f.queue.add(Value::String("junk".into())).await.unwrap();
        f.queue
            .add(key_message("elsewhere", "1").unwrap())
            .await
            .unwrap();

        let stop = StopSignal::new();
        assert_eq!(
            f.dispatcher.dispatch(pop(&f.queue).await, &stop).await,
            Outcome::Malformed
        );
        assert_eq!(
            f.dispatcher.dispatch(pop(&f.queue).await, &stop).await,
            Outcome::Unrouted
        );
        assert!(f.queue.stats().unwrap().is_empty());

        let snapshot = f.dispatcher.metrics();
        assert_eq!(snapshot.malformed, 1);
        assert_eq!(snapshot.unrouted, 1);
    }

    #[tokio::test]
    async fn test_keep_unknown_leaves_item_on_queue() {
        let mut blueprint = blueprint(vec![route("lines", "out")]);
        blueprint.dispatcher.keep_unknown_on_queue = true;
        let f = fixture_with(TwoRecords::ok(), blueprint).await;
        f.queue
            .add(key_message("elsewhere", "1").unwrap())
            .await
            .unwrap();

        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &StopSignal::new()).await;
        assert_eq!(outcome, Outcome::Unrouted);

        let stats = f.queue.stats().unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.in_flight, 0);
        let left = pop(&f.queue).await;
        assert_eq!(left.message["bucket"], "elsewhere");
        assert_eq!(left.message["key"], "1");
    }

    /// Memory queue whose `add` can be switched off
    struct RefusingQueue {
        inner: MemoryQueue,
        refuse_adds: AtomicBool,
    }

    impl WorkQueue for RefusingQueue {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn pop(&self, wait: Option<Duration>) -> Result<Option<Delivery>, ContractError> {
            self.inner.pop(wait).await
        }

        async fn commit(&self, delivery: Delivery) -> Result<(), ContractError> {
            self.inner.commit(delivery).await
        }

        async fn rollback(&self, delivery: Delivery) -> Result<(), ContractError> {
            self.inner.rollback(delivery).await
        }

        async fn add(&self, message: Value) -> Result<(), ContractError> {
            if self.refuse_adds.load(Ordering::SeqCst) {
                return Err(ContractError::queue(self.inner.name(), "queue full"));
            }
            self.inner.add(message).await
        }
    }

    #[tokio::test]
    async fn test_failed_requeue_rolls_back_original() {
        let queue = Arc::new(RefusingQueue {
            inner: MemoryQueue::new("etl", Duration::ZERO),
            refuse_adds: AtomicBool::new(false),
        });
        let dispatcher = DispatcherBuilder::new(
            blueprint(vec![route("lines", "out")]),
            Arc::clone(&queue),
        )
        .transforms(TransformRegistry::new().with("two", TwoRecords::failing(ErrorKind::Transient)))
        .catalog(seeded_catalog().await)
        .build()
        .unwrap();
        queue.add(key_message("raw", "12").unwrap()).await.unwrap();
        let stop = StopSignal::new();

        queue.refuse_adds.store(true, Ordering::SeqCst);
        let delivery = queue.pop(None).await.unwrap().unwrap();
        assert_eq!(dispatcher.dispatch(delivery, &stop).await, Outcome::RolledBack);

        let stats = queue.inner.stats().unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.in_flight, 0);

        // The untouched original comes back and the next cycle goes through
        queue.refuse_adds.store(false, Ordering::SeqCst);
        let delivery = queue.pop(None).await.unwrap().unwrap();
        assert!(delivery.message.get("previous_attempts").map_or(true, |v| v == 0));
        assert_eq!(dispatcher.dispatch(delivery, &stop).await, Outcome::Requeued);
        assert_eq!(dispatcher.metrics().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_stop_rolls_back() {
        let f = fixture(TwoRecords::ok(), vec![route("lines", "out")]).await;
        f.queue
            .add(key_message("raw", "12").unwrap())
            .await
            .unwrap();

        let stop = StopSignal::new();
        stop.cancel();
        let outcome = f.dispatcher.dispatch(pop(&f.queue).await, &stop).await;
        assert_eq!(outcome, Outcome::Shutdown);
        assert_eq!(f.queue.stats().unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_unknown_notify_queue_fails_build() {
        let mut settings = route("lines", "out");
        settings.notify[0].queue = "nowhere".into();
        let err = DispatcherBuilder::new(
            blueprint(vec![settings]),
            Arc::new(MemoryQueue::new("etl", Duration::ZERO)),
        )
        .transforms(TransformRegistry::new().with("two", TwoRecords::ok()))
        .build()
        .unwrap_err();
        assert!(matches!(err, DispatcherError::UnknownQueue { .. }));
    }

    #[tokio::test]
    async fn test_verify_flags_gaps() {
        let catalog = StoreCatalog::in_memory();
        let sink = crate::sinks::BucketSink::new(catalog.bucket("out", "json").unwrap());
        sink.extend(vec![
            Document::new("5.0.0", json!({})),
            Document::new("5.2.0", json!({})),
        ])
        .await
        .unwrap();

        let gapped = BTreeSet::from(["5.0".to_string(), "5.2".to_string()]);
        let err = verify_keys(&sink, "5", &gapped).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonContiguousIds);

        let unseen = BTreeSet::from(["7.0".to_string()]);
        let err = verify_keys(&sink, "7", &unseen).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);

        let itself = BTreeSet::from(["5".to_string()]);
        assert!(verify_keys(&sink, "5", &itself).await.is_ok());
    }
}

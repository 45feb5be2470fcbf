//! SinkRegistry - one shared sink handle per destination setting
//!
//! Two routes with equal `SinkSettings` get the same `Arc`. Creation happens
//! under the registry lock, so concurrent callers never build duplicates.

use std::sync::{Arc, Mutex, MutexGuard};

use bucket_store::StoreCatalog;
use contracts::{ContractError, DocumentSink, SinkSettings};
use tracing::{debug, instrument};

use crate::error::DispatcherError;
use crate::sinks::{BucketSink, NoopSink};

type Entries = Vec<(SinkSettings, Arc<dyn DocumentSink>)>;

pub struct SinkRegistry {
    catalog: Arc<StoreCatalog>,
    sinks: Mutex<Entries>,
}

impl SinkRegistry {
    pub fn new(catalog: Arc<StoreCatalog>) -> Self {
        Self {
            catalog,
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<StoreCatalog> {
        &self.catalog
    }

    /// Register a ready-made sink for `settings`, replacing any existing one
    pub fn insert(
        &self,
        settings: SinkSettings,
        sink: Arc<dyn DocumentSink>,
    ) -> Result<(), DispatcherError> {
        let mut sinks = self.lock()?;
        sinks.retain(|(existing, _)| existing != &settings);
        sinks.push((settings, sink));
        Ok(())
    }

    /// Sink for `settings`, created on first request
    #[instrument(name = "sink_registry_get_or_create", skip(self), fields(sink = %settings.name()))]
    pub fn get_or_create(
        &self,
        settings: &SinkSettings,
    ) -> Result<Arc<dyn DocumentSink>, DispatcherError> {
        let mut sinks = self.lock()?;
        if let Some((_, sink)) = sinks.iter().find(|(existing, _)| existing == settings) {
            return Ok(Arc::clone(sink));
        }

        let sink = self.create(settings)?;
        debug!(sink = %sink.name(), kind = ?sink.kind(), "Sink created");
        sinks.push((settings.clone(), Arc::clone(&sink)));
        Ok(sink)
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().map(|sinks| sinks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn create(&self, settings: &SinkSettings) -> Result<Arc<dyn DocumentSink>, DispatcherError> {
        match settings {
            SinkSettings::Bucket { bucket, extension } => {
                let bucket = self
                    .catalog
                    .bucket(bucket, extension)
                    .map_err(|e| DispatcherError::sink_creation(settings.name(), e.to_string()))?;
                Ok(Arc::new(BucketSink::new(bucket)))
            }
            SinkSettings::Noop { name } => Ok(Arc::new(NoopSink::new(name))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, DispatcherError> {
        self.sinks
            .lock()
            .map_err(|_| ContractError::Other("sink registry lock poisoned".into()).into())
    }
}

//! QueueNotifier - announces new keys as work items

use std::sync::Arc;

use async_trait::async_trait;
use contracts::{key_message, ContractError, Notifier, WorkQueue};
use tracing::trace;

/// Posts `{bucket, key}` work items to a queue
pub struct QueueNotifier<Q> {
    name: String,
    queue: Arc<Q>,
    bucket: String,
}

impl<Q: WorkQueue> QueueNotifier<Q> {
    pub fn new(queue: Arc<Q>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        Self {
            name: format!("{}/{}", queue.name(), bucket),
            queue,
            bucket,
        }
    }
}

#[async_trait]
impl<Q> Notifier for QueueNotifier<Q>
where
    Q: WorkQueue + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, key: &str) -> Result<(), ContractError> {
        self.queue.add(key_message(&self.bucket, key)?).await?;
        trace!(target = %self.name, key, "Notified");
        Ok(())
    }
}

//! Pipeline orchestrator - wires storage, queues and the dispatcher.
//!
//! Queues are in-process: whatever is still on them when the run ends is
//! reported and then lost.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use bucket_store::StoreCatalog;
use contracts::{PipelineBlueprint, StopSignal, WorkQueue};
use dispatcher::DispatcherBuilder;
use serde_json::Value;
use tracing::{info, warn};
use work_queue::QueueHub;

use super::PipelineStats;
use crate::error::Result;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated settings
    pub blueprint: PipelineBlueprint,

    /// Work items enqueued before the workers start
    pub seeds: Vec<Value>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until the queue drains or `stop` fires
    pub async fn run(self, stop: StopSignal) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let PipelineConfig {
            blueprint,
            seeds,
            metrics_port,
        } = self.config;

        if let Some(port) = metrics_port {
            observability::init_metrics_only(port)?;
            info!(port, "Metrics endpoint available");
        }

        let hub = QueueHub::new(blueprint.queue.redelivery_delay());
        let queue = hub.queue(&blueprint.queue.name)?;

        let notify_queues: BTreeSet<&str> = blueprint
            .routes
            .iter()
            .flat_map(|route| route.notify.iter().map(|target| target.queue.as_str()))
            .collect();

        let catalog = Arc::new(StoreCatalog::new(blueprint.storage.clone()));
        let mut builder = DispatcherBuilder::new(blueprint.clone(), Arc::clone(&queue))
            .transforms(transforms::builtin_registry())
            .catalog(catalog);
        for name in notify_queues {
            builder = builder.notify_queue(hub.queue(name)?);
        }
        let dispatcher = builder.build()?;

        let seeded = seeds.len();
        for message in seeds {
            queue.add(message).await?;
        }
        info!(
            queue = %queue.name(),
            seeded,
            routes = dispatcher.routes().len(),
            "Pipeline initialized"
        );

        let dispatch = dispatcher.run(&stop).await?;

        let mut stats = PipelineStats {
            seeded,
            duration: start_time.elapsed(),
            dispatch,
            ..Default::default()
        };
        for name in hub.names()? {
            let queue_stats = hub.queue(&name)?.stats()?;
            observability::record_queue_depth(&name, queue_stats.ready, queue_stats.in_flight);
            stats.queues.insert(name, queue_stats);
        }

        if stats.pending() > 0 {
            warn!(
                pending = stats.pending(),
                "Messages left on in-process queues will be discarded"
            );
        }
        Ok(stats)
    }
}

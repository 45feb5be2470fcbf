//! PipelineBlueprint - Config Loader output
//!
//! Describes the full pipeline: dispatcher tuning, work queue, storage
//! backend, routes and shared resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Worker pool and retry policy
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// Shared work queue
    #[serde(default)]
    pub queue: QueueSettings,

    /// Object-store backend used for every bucket
    #[serde(default)]
    pub storage: StorageSettings,

    /// Route definitions
    pub routes: Vec<RouteSettings>,

    /// Read-only lookups handed to transforms
    #[serde(default)]
    pub resources: HashMap<String, Value>,
}

/// Dispatcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Number of independent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Failures requeued silently below this many attempts
    #[serde(default = "default_min_attempts")]
    pub min_attempts: u32,

    /// Items are rejected once attempts exceed this
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Keep polling an empty queue instead of finishing
    #[serde(default)]
    pub wait_forever: bool,

    /// Longest single blocking pop in wait-forever mode
    #[serde(default = "default_extra_wait_secs")]
    pub extra_wait_secs: u64,

    /// Leave items with no matching route on the queue
    #[serde(default)]
    pub keep_unknown_on_queue: bool,
}

fn default_workers() -> usize {
    1
}

fn default_min_attempts() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    10
}

fn default_extra_wait_secs() -> u64 {
    20
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            min_attempts: default_min_attempts(),
            max_attempts: default_max_attempts(),
            wait_forever: false,
            extra_wait_secs: default_extra_wait_secs(),
            keep_unknown_on_queue: false,
        }
    }
}

impl DispatcherSettings {
    pub fn extra_wait(&self) -> Duration {
        Duration::from_secs(self.extra_wait_secs)
    }
}

/// Work queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Queue name
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Delay before a rolled-back message is visible again
    #[serde(default = "default_redelivery_delay_secs")]
    pub redelivery_delay_secs: u64,
}

fn default_queue_name() -> String {
    "etl".to_string()
}

fn default_redelivery_delay_secs() -> u64 {
    30
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            redelivery_delay_secs: default_redelivery_delay_secs(),
        }
    }
}

impl QueueSettings {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_secs(self.redelivery_delay_secs)
    }
}

/// Object-store backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageSettings {
    /// Process-local, lost on exit
    #[default]
    Memory,
    /// One directory per bucket under `root`
    Local { root: PathBuf },
}

/// Route definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSettings {
    /// Route name (used for logging)
    pub name: String,

    /// Where work items come from
    pub source: SourceSettings,

    /// Transform id in the transform registry
    pub transform: String,

    /// Reconciliation behavior
    #[serde(default)]
    pub transform_kind: TransformKind,

    /// Where output goes
    pub destination: SinkSettings,

    /// Queues told about every new key
    #[serde(default)]
    pub notify: Vec<NotifySettings>,
}

/// Route source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Bucket whose work items this route handles
    pub bucket: String,

    /// Extension source objects may be stored with
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Transform kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Reconcile old and new destination keys
    #[default]
    Normal,
    /// Destination has no prefix lookup; skip reconciliation
    Bulk,
}

/// Destination sink settings
///
/// Two routes with equal settings share one sink handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkSettings {
    /// Object-store bucket with reconciling writes
    Bucket {
        bucket: String,
        #[serde(default = "default_extension")]
        extension: String,
    },
    /// Discards output
    Noop { name: String },
}

fn default_extension() -> String {
    "json".to_string()
}

impl SinkSettings {
    /// Name used for destination matching
    pub fn name(&self) -> &str {
        match self {
            Self::Bucket { bucket, .. } => bucket,
            Self::Noop { name } => name,
        }
    }
}

/// Notification target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySettings {
    /// Queue to post to
    pub queue: String,

    /// Bucket named in the posted work items
    pub bucket: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DispatcherSettings::default();
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.min_attempts, 3);
        assert_eq!(settings.max_attempts, 10);
        assert!(!settings.keep_unknown_on_queue);
        assert_eq!(QueueSettings::default().name, "etl");
        assert_eq!(StorageSettings::default(), StorageSettings::Memory);
    }

    #[test]
    fn test_sink_settings_name() {
        let bucket = SinkSettings::Bucket {
            bucket: "unittest".into(),
            extension: "json".into(),
        };
        assert_eq!(bucket.name(), "unittest");
        assert_eq!(SinkSettings::Noop { name: "void".into() }.name(), "void");
    }
}

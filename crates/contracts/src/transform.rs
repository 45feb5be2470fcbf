//! Transform contract
//!
//! The one interface the dispatcher calls into format-specific code.
//! Transforms report failure through a structured `ErrorKind` so the
//! dispatcher can classify it without looking at message text.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{ContractError, DocumentSink, SourceReader};

/// Cooperative stop signal shared by every worker
pub type StopSignal = CancellationToken;

/// Failure classes the dispatcher recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Source object not visible (yet)
    KeyNotFound,
    /// Source key resolves to several stored objects
    MultipleKeys,
    /// Produced keys have gaps in their id sequence
    NonContiguousIds,
    /// Key fails structural validation; retrying cannot help
    WrongKeyFormat,
    /// Network blip, destination temporarily unavailable, "try later"
    Transient,
    /// Stop signal observed mid-transform
    Shutdown,
    /// Anything unrecognized
    Fatal,
}

impl ErrorKind {
    /// Whether another attempt may succeed
    pub fn is_retryable(self) -> bool {
        match self {
            Self::KeyNotFound
            | Self::MultipleKeys
            | Self::NonContiguousIds
            | Self::Transient
            | Self::Fatal => true,
            Self::WrongKeyFormat | Self::Shutdown => false,
        }
    }

    /// Whether the condition is a known transient one (logged as a warning)
    pub fn is_recognized(self) -> bool {
        !matches!(self, Self::Fatal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyNotFound => "key_not_found",
            Self::MultipleKeys => "multiple_keys",
            Self::NonContiguousIds => "non_contiguous_ids",
            Self::WrongKeyFormat => "wrong_key_format",
            Self::Transient => "transient",
            Self::Shutdown => "shutdown",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transform failure
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransformError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransformError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn shutdown() -> Self {
        Self::new(ErrorKind::Shutdown, "stop signal received")
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn wrong_key_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WrongKeyFormat, message)
    }

    pub fn non_contiguous(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonContiguousIds, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ContractError> for TransformError {
    fn from(error: ContractError) -> Self {
        let kind = match &error {
            ContractError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            ContractError::MultipleKeys { .. } => ErrorKind::MultipleKeys,
            ContractError::KeyFormat { .. } => ErrorKind::WrongKeyFormat,
            ContractError::MalformedWorkItem { .. } => ErrorKind::WrongKeyFormat,
            ContractError::Storage { .. }
            | ContractError::SinkWrite { .. }
            | ContractError::SinkConnection { .. }
            | ContractError::Queue { .. }
            | ContractError::Io(_) => ErrorKind::Transient,
            ContractError::ConfigParse { .. }
            | ContractError::ConfigValidation { .. }
            | ContractError::Json(_)
            | ContractError::Other(_) => ErrorKind::Fatal,
        };
        Self {
            kind,
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

/// Read-only lookups shared by every transform invocation
#[derive(Debug, Clone, Default)]
pub struct Resources {
    lookups: HashMap<String, Value>,
}

impl Resources {
    pub fn new(lookups: HashMap<String, Value>) -> Self {
        Self { lookups }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.lookups.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lookups.keys().map(String::as_str)
    }
}

/// A registered transform
///
/// Must be safe to call concurrently with different arguments.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Turn one source into destination documents
    ///
    /// Returns the destination keys written. `None` and an empty set both
    /// mean "produced nothing".
    async fn transform(
        &self,
        source_key: &str,
        source: &dyn SourceReader,
        destination: &dyn DocumentSink,
        resources: &Resources,
        stop: &StopSignal,
    ) -> Result<Option<BTreeSet<String>>, TransformError>;
}

/// Transforms by id, populated once at startup
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a transform under `id`
    pub fn register(&mut self, id: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.insert(id.into(), transform);
    }

    pub fn with(mut self, id: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        self.register(id, transform);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transforms.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

//! Layered error definitions
//!
//! Categorized by source: config / work item / key / storage / sink / queue

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Work Item Errors =====
    /// Queue message is not a well-formed work item
    #[error("malformed work item: {message}")]
    MalformedWorkItem { message: String },

    /// Key fails structural validation
    #[error("wrong key format '{key}': {message}")]
    KeyFormat { key: String, message: String },

    // ===== Storage Errors =====
    /// Object does not exist (yet)
    #[error("key {key} does not exist in {bucket}")]
    KeyNotFound { bucket: String, key: String },

    /// Key resolves to more than one stored object
    #[error("multiple keys in {bucket} match {key}: {matches:?}")]
    MultipleKeys {
        bucket: String,
        key: String,
        matches: Vec<String>,
    },

    /// Storage backend failure
    #[error("storage error in {bucket}: {message}")]
    Storage { bucket: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    // ===== Queue Errors =====
    /// Work queue failure
    #[error("queue '{queue}' error: {message}")]
    Queue { queue: String, message: String },

    // ===== General Errors =====
    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create malformed work item error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedWorkItem {
            message: message.into(),
        }
    }

    /// Create key format error
    pub fn key_format(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyFormat {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create key not found error
    pub fn key_not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::KeyNotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create storage error
    pub fn storage(bucket: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            bucket: bucket.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create queue error
    pub fn queue(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Queue {
            queue: queue.into(),
            message: message.into(),
        }
    }
}

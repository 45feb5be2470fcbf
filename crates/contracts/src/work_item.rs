//! WorkItem - work queue message
//!
//! Points at the bucket and key(s) to process. Producers create it, the
//! dispatcher only ever bumps `previous_attempts`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ContractError;

/// Work queue message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Source bucket
    pub bucket: String,

    /// Single source key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Multiple source keys, concatenated in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,

    /// Restrict processing to routes writing to this destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Unix seconds at creation
    #[serde(default)]
    pub timestamp: f64,

    /// Human-readable creation time
    #[serde(
        rename = "date/time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub date_time: Option<String>,

    /// Failed dispatch cycles so far
    #[serde(default)]
    pub previous_attempts: u32,

    /// Producer fields we do not interpret, kept across requeues
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkItem {
    /// Create a single-key work item stamped with the current time
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            bucket: bucket.into(),
            key: Some(key.into()),
            keys: None,
            destination: None,
            timestamp: now.timestamp_millis() as f64 / 1000.0,
            date_time: Some(now.format("%Y-%m-%d %H:%M:%S").to_string()),
            previous_attempts: 0,
            extra: Map::new(),
        }
    }

    /// Scope the item to one downstream destination
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Parse a raw queue message
    ///
    /// Accepts the legacy `{"bucket": {"bucket": name}}` shape.
    ///
    /// # Errors
    /// `MalformedWorkItem` if the message is not an object, has no usable
    /// bucket, or does not carry exactly one of `key`/`keys`.
    pub fn from_value(message: &Value) -> Result<Self, ContractError> {
        let mut object = match message {
            Value::Object(object) => object.clone(),
            other => {
                return Err(ContractError::malformed(format!(
                    "expected an object, got {other}"
                )))
            }
        };

        if let Some(Value::Object(nested)) = object.get("bucket") {
            let name = nested.get("bucket").cloned().unwrap_or(Value::Null);
            object.insert("bucket".to_string(), name);
        }

        let item: WorkItem = serde_json::from_value(Value::Object(object))
            .map_err(|e| ContractError::malformed(e.to_string()))?;
        item.source_keys()?;
        Ok(item)
    }

    /// Serialize back to a queue message
    pub fn to_value(&self) -> Result<Value, ContractError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The key(s) this item names, in order
    ///
    /// # Errors
    /// `MalformedWorkItem` unless exactly one of `key`/`keys` is present and non-empty.
    pub fn source_keys(&self) -> Result<Vec<String>, ContractError> {
        match (&self.key, &self.keys) {
            (Some(key), None) if !key.is_empty() => Ok(vec![key.clone()]),
            (None, Some(keys)) if !keys.is_empty() && keys.iter().all(|k| !k.is_empty()) => {
                Ok(keys.clone())
            }
            (Some(_), Some(_)) => Err(ContractError::malformed(
                "both 'key' and 'keys' are present",
            )),
            _ => Err(ContractError::malformed("missing 'key' or 'keys'")),
        }
    }

    /// Key used for logging
    pub fn display_key(&self) -> String {
        match (&self.key, &self.keys) {
            (Some(key), _) => key.clone(),
            (None, Some(keys)) => keys.join(","),
            (None, None) => String::new(),
        }
    }
}

//! Document - unit of transform output

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output record addressed by its provenance key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Full provenance key of this record
    pub id: String,

    /// Record body
    pub value: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// How a sink treats documents already stored under the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Merge with stored siblings, keeping ones not regenerated
    #[default]
    Merge,
    /// Replace whatever is stored
    Overwrite,
}

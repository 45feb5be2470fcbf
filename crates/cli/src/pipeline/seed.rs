//! Work items enqueued before the dispatcher starts

use std::path::Path;

use contracts::WorkItem;
use serde_json::Value;

use crate::error::{CliError, Result};

/// One work item per key
pub fn manual_items(bucket: &str, keys: &[String]) -> Result<Vec<Value>> {
    keys.iter()
        .map(|key| Ok(WorkItem::new(bucket, key).to_value()?))
        .collect()
}

/// Work items from a JSON-lines file, blank lines skipped
///
/// Every line must parse as a work item; the first bad line fails the load.
pub fn load_seed_file(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)?;
    let display = path.display().to_string();

    let mut items = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: Value = serde_json::from_str(line)
            .map_err(|e| CliError::seed(&display, idx + 1, e.to_string()))?;
        WorkItem::from_value(&message)
            .map_err(|e| CliError::seed(&display, idx + 1, e.to_string()))?;
        items.push(message);
    }
    Ok(items)
}

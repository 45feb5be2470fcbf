//! Line -> document conversion shared by the built-ins

use contracts::{Document, ProvenanceNode, TransformError};
use serde_json::{json, Map, Value};

/// Build the document for one source line
///
/// JSON object lines keep their fields; anything else is wrapped as
/// `{"line": ...}`. Either way the `etl` header is set to `node`.
pub(crate) fn line_document(node: &ProvenanceNode, line: &str) -> Result<Document, TransformError> {
    let mut fields = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => fields,
        _ => {
            let mut fields = Map::new();
            fields.insert("line".to_string(), json!(line));
            fields
        }
    };

    let header = serde_json::to_value(node)
        .map_err(|e| TransformError::fatal(format!("etl header: {e}")))?;
    fields.insert("etl".to_string(), header);

    Ok(Document::new(etl_key::encode(node), Value::Object(fields)))
}

/// Provenance node of the source key
pub(crate) fn source_node(source_key: &str) -> Result<ProvenanceNode, TransformError> {
    etl_key::decode(source_key)
        .map_err(|e| TransformError::wrong_key_format(e.to_string()))
}

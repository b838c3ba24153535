//! User-defined metadata attached to objects.

use std::collections::BTreeMap;

use serde_json::Error as JsonError;

/// Key-value metadata entries attached to an object.
///
/// A `BTreeMap` keeps keys unique and gives a stable order when the map is
/// rendered as headers or persisted.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Serialize metadata for storage in a single text column.
pub fn encode_metadata(metadata: &ObjectMetadata) -> Result<String, JsonError> {
    serde_json::to_string(metadata)
}

/// Inverse of [`encode_metadata`]. An empty column decodes to an empty map.
pub fn decode_metadata(raw: &str) -> Result<ObjectMetadata, JsonError> {
    if raw.is_empty() {
        return Ok(ObjectMetadata::new());
    }
    serde_json::from_str(raw)
}

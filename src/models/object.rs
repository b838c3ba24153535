//! Represents an object (blob) as written by callers and as described on read.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::metadata::ObjectMetadata;

/// Content type used when a caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A write request for a single object.
///
/// A put with an existing key fully replaces the previous object, body and
/// metadata alike.
#[derive(Clone, Debug)]
pub struct PutObject {
    /// Object key (opaque, conventionally a `/`-delimited path).
    pub key: String,

    /// Object payload. Immutable once handed to the store.
    pub body: Bytes,

    /// Content type (MIME type).
    pub content_type: String,

    /// Optional user metadata.
    pub metadata: ObjectMetadata,
}

impl PutObject {
    pub fn new(
        key: impl Into<String>,
        body: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            content_type: content_type.into(),
            metadata: ObjectMetadata::new(),
        }
    }

    /// Attach one metadata entry, replacing any previous value for `name`.
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// Replace the whole metadata map.
    pub fn with_metadata_map(mut self, metadata: ObjectMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Describes a stored object. It carries no content bytes; the body is
/// delivered separately as a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,

    /// Content type (MIME type).
    pub content_type: String,

    /// User metadata as written.
    pub metadata: ObjectMetadata,

    /// Size in bytes.
    pub size_bytes: u64,

    /// MD5 hex digest of the body.
    pub etag: String,

    /// Timestamp of the write that produced this object.
    pub last_modified: DateTime<Utc>,
}

impl ObjectInfo {
    /// Build the descriptor for a body that is being written now.
    pub fn describe(request: &PutObject) -> Self {
        Self {
            key: request.key.clone(),
            content_type: request.content_type.clone(),
            metadata: request.metadata.clone(),
            size_bytes: request.body.len() as u64,
            etag: format!("{:x}", md5::compute(&request.body)),
            last_modified: Utc::now(),
        }
    }
}

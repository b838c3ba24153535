//! Object storage abstraction with interchangeable backends.
//!
//! [`BlobStorage`] is the four-operation contract (put, get, delete,
//! delete-by-prefix). [`MemoryBlobStorage`] is the in-memory reference
//! backend used in tests and local development; [`DiskBlobStorage`] persists
//! objects to SQLite and local disk. The `handlers`/`routes` modules expose any
//! backend over HTTP for development use.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use models::{metadata::ObjectMetadata, object::ObjectInfo, object::PutObject};
pub use services::{
    BlobError, BlobObject, BlobResult, BlobStorage, BlobStream, DiskBlobStorage,
    MemoryBlobStorage,
    blob_storage::{cancellable, deadline_token, ensure_not_cancelled},
};
pub use tokio_util::sync::CancellationToken;

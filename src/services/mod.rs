//! Storage backends and the contract they share.

pub mod blob_storage;
pub mod disk_storage;
pub mod memory_storage;

#[cfg(test)]
mod contract_tests;

pub use blob_storage::{BlobError, BlobObject, BlobResult, BlobStorage, BlobStream};
pub use disk_storage::DiskBlobStorage;
pub use memory_storage::MemoryBlobStorage;

//! src/services/memory_storage.rs
//!
//! MemoryBlobStorage: the reference `BlobStorage` backend. Objects live in a
//! process-local map and are lost when the instance is dropped. Used by tests
//! and for local development.

use crate::{
    models::object::{ObjectInfo, PutObject},
    services::blob_storage::{
        BlobError, BlobObject, BlobResult, BlobStorage, BlobStream, ensure_not_cancelled,
        guard_stream,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Debug)]
struct StoredBlob {
    info: ObjectInfo,
    body: Bytes,
}

/// In-memory, HashMap-based blob store.
///
/// Every operation does its whole lookup-and-mutate sequence under one lock
/// acquisition, so calls from concurrent tasks never interleave within an
/// operation. Bodies are immutable `Bytes`; a read hands out a cheap clone that
/// later writes cannot alter.
#[derive(Default)]
pub struct MemoryBlobStorage {
    objects: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted list of all keys currently stored.
    pub fn keys(&self) -> BlobResult<Vec<String>> {
        let mut keys: Vec<String> = self.read_map()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> BlobResult<usize> {
        Ok(self.read_map()?.len())
    }

    pub fn is_empty(&self) -> BlobResult<bool> {
        Ok(self.read_map()?.is_empty())
    }

    /// Remove all objects from the store.
    pub fn clear(&self) -> BlobResult<()> {
        self.write_map()?.clear();
        Ok(())
    }

    fn read_map(&self) -> BlobResult<RwLockReadGuard<'_, HashMap<String, StoredBlob>>> {
        self.objects
            .read()
            .map_err(|_| BlobError::Backend("in-memory object map lock poisoned".into()))
    }

    fn write_map(&self) -> BlobResult<RwLockWriteGuard<'_, HashMap<String, StoredBlob>>> {
        self.objects
            .write()
            .map_err(|_| BlobError::Backend("in-memory object map lock poisoned".into()))
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn put_object(
        &self,
        request: PutObject,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<ObjectInfo> {
        ensure_not_cancelled(cancel)?;
        let info = ObjectInfo::describe(&request);

        self.write_map()?.insert(
            request.key,
            StoredBlob {
                info: info.clone(),
                body: request.body,
            },
        );
        debug!("stored object {} ({} bytes)", info.key, info.size_bytes);
        Ok(info)
    }

    async fn get_object(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<BlobObject> {
        ensure_not_cancelled(cancel)?;
        let stored = self
            .read_map()?
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))?;

        let body = stored.body;
        let chunks: BlobStream = stream::once(async move { Ok(body) }).boxed();
        Ok(BlobObject::new(stored.info, guard_stream(chunks, cancel)))
    }

    async fn delete_object(&self, key: &str, cancel: Option<&CancellationToken>) -> BlobResult<()> {
        ensure_not_cancelled(cancel)?;
        if self.write_map()?.remove(key).is_some() {
            debug!("deleted object {}", key);
        }
        Ok(())
    }

    async fn remove_directory(
        &self,
        key_prefix: &str,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<usize> {
        ensure_not_cancelled(cancel)?;
        let mut map = self.write_map()?;
        let before = map.len();
        map.retain(|key, _| !key.starts_with(key_prefix));
        let removed = before - map.len();
        debug!("removed {} objects under prefix {:?}", removed, key_prefix);
        Ok(removed)
    }
}

impl std::fmt::Debug for MemoryBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len().unwrap_or_default();
        f.debug_struct("MemoryBlobStorage")
            .field("object_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::contract_tests;

    #[tokio::test]
    async fn satisfies_blob_storage_contract() {
        contract_tests::run_all(&MemoryBlobStorage::new()).await;
    }

    #[tokio::test]
    async fn keys_track_puts_and_deletes() {
        let store = MemoryBlobStorage::new();
        for key in ["b", "a", "c/1"] {
            store
                .put_object(PutObject::new(key, "x", "text/plain"), None)
                .await
                .unwrap();
        }
        store.delete_object("b", None).await.unwrap();
        store
            .put_object(PutObject::new("a", "y", "text/plain"), None)
            .await
            .unwrap();

        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "c/1".to_string()]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn get_yields_single_chunk() {
        let store = MemoryBlobStorage::new();
        store
            .put_object(PutObject::new("k", "payload", "text/plain"), None)
            .await
            .unwrap();

        let chunks: Vec<_> = store
            .get_object("k", None)
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from("payload"));
    }

    #[tokio::test]
    async fn read_view_does_not_alias_later_writes() {
        let store = MemoryBlobStorage::new();
        store
            .put_object(PutObject::new("k", "first", "text/plain"), None)
            .await
            .unwrap();
        let object = store.get_object("k", None).await.unwrap();

        store
            .put_object(PutObject::new("k", "second", "text/plain"), None)
            .await
            .unwrap();
        store.delete_object("k", None).await.unwrap();

        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from("first"));
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let store = MemoryBlobStorage::new();
        store
            .put_object(PutObject::new("k", "v", "text/plain"), None)
            .await
            .unwrap();
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn concurrent_writers_on_distinct_keys() {
        let store = std::sync::Arc::new(MemoryBlobStorage::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_object(
                        PutObject::new(format!("jobs/{i}"), vec![i as u8; 64], "x/raw"),
                        None,
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len().unwrap(), 32);
        assert_eq!(store.remove_directory("jobs/", None).await.unwrap(), 32);
        assert!(store.is_empty().unwrap());
    }
}

//! src/services/disk_storage.rs
//!
//! DiskBlobStorage: a durable `BlobStorage` backend. Object metadata lives in
//! SQLite and payloads on local disk, sharded beneath
//! `base_path/{shard}/{shard}/{md5(key)}-{write id}`. Payload names derive
//! from the key's digest plus a fresh id per write, so any key string maps to
//! a safe file name, keys like `a` and `a/b` never collide on disk, and an
//! overwrite never touches the file the current row points at.

use crate::{
    models::{
        metadata::{decode_metadata, encode_metadata},
        object::{ObjectInfo, PutObject},
    },
    services::blob_storage::{
        BlobError, BlobObject, BlobResult, BlobStorage, BlobStream, cancellable,
        ensure_not_cancelled, guard_stream,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const WRITE_CHUNK_SIZE: usize = 64 * 1024;
const STAGING_DIR: &str = ".staging";
const MIGRATIONS: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, FromRow)]
struct BlobRow {
    key: String,
    content_type: String,
    metadata: String,
    size_bytes: i64,
    etag: String,
    last_modified: DateTime<Utc>,
    /// Payload file, relative to `base_path`.
    payload: String,
}

impl BlobRow {
    fn into_info(self) -> BlobResult<ObjectInfo> {
        let metadata = decode_metadata(&self.metadata).map_err(|err| {
            BlobError::Backend(format!("corrupt metadata for `{}`: {}", self.key, err))
        })?;
        Ok(ObjectInfo {
            key: self.key,
            content_type: self.content_type,
            metadata,
            size_bytes: self.size_bytes.max(0) as u64,
            etag: self.etag,
            last_modified: self.last_modified,
        })
    }
}

/// DiskBlobStorage persists objects across process restarts.
///
/// Bodies are staged into a temp file and renamed to a payload name unique to
/// that write. The row is switched to the new payload in one transaction and
/// the previous payload is unlinked only once that commit succeeds, so readers
/// see either the old or the new object and a failed put leaves the old one
/// intact. Mutations and the metadata+open step of reads serialize on one
/// async mutex per instance.
#[derive(Clone)]
pub struct DiskBlobStorage {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    write_lock: Arc<Mutex<()>>,
}

impl DiskBlobStorage {
    /// Wrap an existing pool. Call [`DiskBlobStorage::migrate`] before use if
    /// the schema may be missing.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open the metadata database at `database_url` (created if missing),
    /// ensure the payload directory exists and apply migrations.
    pub async fn connect(database_url: &str, base_path: impl Into<PathBuf>) -> BlobResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        Self::connect_with(options, base_path).await
    }

    pub async fn connect_with(
        options: SqliteConnectOptions,
        base_path: impl Into<PathBuf>,
    ) -> BlobResult<Self> {
        let base_path = base_path.into();
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let storage = Self::new(Arc::new(pool), base_path);
        storage.migrate().await?;
        Ok(storage)
    }

    /// Apply the embedded schema and create the payload directories. Every
    /// step is idempotent.
    pub async fn migrate(&self) -> BlobResult<()> {
        fs::create_dir_all(self.base_path.join(STAGING_DIR)).await?;

        let statements = MIGRATIONS
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Sorted list of all keys currently stored.
    pub async fn keys(&self) -> BlobResult<Vec<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT key FROM blobs ORDER BY key ASC")
                .fetch_all(&*self.db)
                .await?,
        )
    }

    /// Rejects keys the metadata index cannot hold sensibly: empty, longer
    /// than 1024 bytes, or containing control characters.
    fn ensure_key_safe(key: &str) -> BlobResult<()> {
        if key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.bytes().any(|b| b.is_ascii_control())
        {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Fresh payload name for one write of `key`:
    /// {shard}/{shard}/{digest}-{write id}, relative to `base_path`.
    fn payload_name(key: &str) -> String {
        let digest = md5::compute(key.as_bytes());
        format!(
            "{:02x}/{:02x}/{:x}-{}",
            digest[0],
            digest[1],
            digest,
            Uuid::new_v4().simple()
        )
    }

    fn payload_path(&self, payload: &str) -> PathBuf {
        self.base_path.join(payload)
    }

    async fn lock(&self, cancel: Option<&CancellationToken>) -> BlobResult<MutexGuard<'_, ()>> {
        cancellable(cancel, async { Ok(self.write_lock.lock().await) }).await
    }

    async fn fetch_row(&self, key: &str) -> BlobResult<BlobRow> {
        sqlx::query_as::<_, BlobRow>(
            "SELECT key, content_type, metadata, size_bytes, etag, last_modified, payload
             FROM blobs WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BlobError::NotFound(key.to_string()),
            other => BlobError::Sqlx(other),
        })
    }

    /// Write `body` into `tmp_path` chunk by chunk, checking for cancellation
    /// between chunks, then flush and fsync.
    async fn stage_body(
        &self,
        tmp_path: &Path,
        body: &Bytes,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<()> {
        let mut file = File::create(tmp_path).await?;
        for chunk in body.chunks(WRITE_CHUNK_SIZE) {
            ensure_not_cancelled(cancel)?;
            file.write_all(chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Move the staged body to a new payload file and point the row at it.
    ///
    /// The previous payload is unlinked only after the row commits. If the
    /// commit fails, only the new payload is removed and the old object stays
    /// readable.
    async fn commit_staged(
        &self,
        tmp_path: &Path,
        info: &ObjectInfo,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<()> {
        let _guard = self.lock(cancel).await?;
        ensure_not_cancelled(cancel)?;

        let metadata = encode_metadata(&info.metadata)
            .map_err(|err| BlobError::Backend(format!("encoding metadata: {}", err)))?;
        let payload = Self::payload_name(&info.key);
        let payload_path = self.payload_path(&payload);

        if let Some(parent) = payload_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(tmp_path, &payload_path).await?;

        match self.upsert_row(info, &metadata, &payload).await {
            Ok(previous) => {
                if let Some(previous) = previous {
                    self.remove_payload(&previous).await;
                }
                Ok(())
            }
            Err(err) => {
                self.remove_payload(&payload).await;
                Err(err)
            }
        }
    }

    /// Upsert the row for `info` and return the payload it pointed at before.
    async fn upsert_row(
        &self,
        info: &ObjectInfo,
        metadata: &str,
        payload: &str,
    ) -> BlobResult<Option<String>> {
        let mut tx = self.db.begin().await?;
        let previous = sqlx::query_scalar::<_, String>("SELECT payload FROM blobs WHERE key = ?")
            .bind(&info.key)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO blobs (key, content_type, metadata, size_bytes, etag, last_modified, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                metadata = excluded.metadata,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                payload = excluded.payload
            "#,
        )
        .bind(&info.key)
        .bind(&info.content_type)
        .bind(metadata)
        .bind(info.size_bytes as i64)
        .bind(&info.etag)
        .bind(info.last_modified)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(previous)
    }

    /// Remove a payload file and prune the shard directories it leaves empty.
    async fn remove_payload(&self, payload: &str) {
        let file_path = self.payload_path(payload);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => warn!("failed to remove {}: {}", file_path.display(), err),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
    }

    /// Remove empty directories upwards, stopping below `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStorage for DiskBlobStorage {
    async fn put_object(
        &self,
        request: PutObject,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<ObjectInfo> {
        Self::ensure_key_safe(&request.key)?;
        ensure_not_cancelled(cancel)?;

        let info = ObjectInfo::describe(&request);
        let tmp_path = self
            .base_path
            .join(STAGING_DIR)
            .join(format!(".tmp-{}", Uuid::new_v4()));

        let result = match self.stage_body(&tmp_path, &request.body, cancel).await {
            Ok(()) => self.commit_staged(&tmp_path, &info, cancel).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                debug!("stored object {} ({} bytes)", info.key, info.size_bytes);
                Ok(info)
            }
            Err(err) => {
                if let Err(rm_err) = fs::remove_file(&tmp_path).await {
                    if rm_err.kind() != ErrorKind::NotFound {
                        warn!(
                            "failed to clean staged file {}: {}",
                            tmp_path.display(),
                            rm_err
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn get_object(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<BlobObject> {
        ensure_not_cancelled(cancel)?;
        let (row, file) = {
            let _guard = self.lock(cancel).await?;
            let row = cancellable(cancel, self.fetch_row(key)).await?;
            let file = File::open(self.payload_path(&row.payload))
                .await
                .map_err(|err| {
                    if err.kind() == io::ErrorKind::NotFound {
                        BlobError::NotFound(key.to_string())
                    } else {
                        BlobError::Io(err)
                    }
                })?;
            (row, file)
        };

        let chunks: BlobStream = ReaderStream::new(file)
            .map(|chunk| chunk.map_err(BlobError::from))
            .boxed();
        Ok(BlobObject::new(row.into_info()?, guard_stream(chunks, cancel)))
    }

    async fn delete_object(&self, key: &str, cancel: Option<&CancellationToken>) -> BlobResult<()> {
        ensure_not_cancelled(cancel)?;
        let _guard = self.lock(cancel).await?;
        ensure_not_cancelled(cancel)?;

        let removed =
            sqlx::query_scalar::<_, String>("DELETE FROM blobs WHERE key = ? RETURNING payload")
                .bind(key)
                .fetch_optional(&*self.db)
                .await?;

        if let Some(payload) = removed {
            self.remove_payload(&payload).await;
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
        let _guard = self.lock(cancel).await?;
        ensure_not_cancelled(cancel)?;

        // substr() rather than LIKE so `%` and `_` in the prefix stay literal.
        let removed = sqlx::query_scalar::<_, String>(
            "DELETE FROM blobs WHERE substr(key, 1, length(?1)) = ?1 RETURNING payload",
        )
        .bind(key_prefix)
        .fetch_all(&*self.db)
        .await?;

        for payload in &removed {
            self.remove_payload(payload).await;
        }
        debug!(
            "removed {} objects under prefix {:?}",
            removed.len(),
            key_prefix
        );
        Ok(removed.len())
    }
}

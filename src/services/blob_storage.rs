//! src/services/blob_storage.rs
//!
//! The `BlobStorage` contract: the four operations every backend provides,
//! the `BlobObject` read view, the error taxonomy, and the cancellation
//! helpers that backends thread through each call.

use crate::models::object::{ObjectInfo, PutObject};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use std::{fmt, future::Future, io, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BlobError::Cancelled)
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Single-consumption stream of body chunks.
pub type BlobStream = BoxStream<'static, BlobResult<Bytes>>;

/// Result of `get_object`: the object's descriptor plus its body as a stream.
///
/// Produced fresh per call. The stream is consumed at most once.
pub struct BlobObject {
    pub info: ObjectInfo,
    stream: BlobStream,
}

impl BlobObject {
    pub fn new(info: ObjectInfo, stream: BlobStream) -> Self {
        Self { info, stream }
    }

    pub fn into_stream(self) -> BlobStream {
        self.stream
    }

    /// Drain the stream into one contiguous buffer.
    pub async fn into_bytes(self) -> BlobResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.info.size_bytes as usize);
        let mut stream = self.stream;
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobObject")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Object storage capability.
///
/// All implementations must satisfy these invariants:
/// - Only one object exists per key; a put fully replaces the previous object.
/// - `get_object` on an absent key fails with [`BlobError::NotFound`].
/// - `delete_object` and `remove_directory` are idempotent.
/// - `remove_directory` matches keys with a literal `starts_with`, never a
///   glob or a path-segment comparison.
/// - A cancelled operation leaves no partially written object behind.
///
/// Failures are surfaced immediately; retrying is the caller's decision.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Write or overwrite the object at `request.key` and return the
    /// descriptor now stored for it.
    async fn put_object(
        &self,
        request: PutObject,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<ObjectInfo>;

    /// Open the current body of the object at `key`.
    async fn get_object(
        &self,
        key: &str,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<BlobObject>;

    /// Remove the object at `key`. Absent keys are a successful no-op.
    async fn delete_object(&self, key: &str, cancel: Option<&CancellationToken>)
    -> BlobResult<()>;

    /// Remove every key starting with `key_prefix` and return how many were
    /// removed by this call.
    async fn remove_directory(
        &self,
        key_prefix: &str,
        cancel: Option<&CancellationToken>,
    ) -> BlobResult<usize>;
}

/// Fail with [`BlobError::Cancelled`] if the token has already fired.
pub fn ensure_not_cancelled(cancel: Option<&CancellationToken>) -> BlobResult<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(BlobError::Cancelled),
        _ => Ok(()),
    }
}

/// Race `fut` against the token.
///
/// Only for futures without side effects: when the token wins, `fut` is
/// dropped wherever it was suspended.
pub async fn cancellable<T, F>(cancel: Option<&CancellationToken>, fut: F) -> BlobResult<T>
where
    F: Future<Output = BlobResult<T>>,
{
    match cancel {
        None => fut.await,
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(BlobError::Cancelled),
                res = fut => res,
            }
        }
    }
}

/// A token that cancels itself once `timeout` has elapsed.
///
/// Must be called from within a Tokio runtime.
pub fn deadline_token(timeout: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => timer.cancel(),
            _ = timer.cancelled() => {}
        }
    });
    token
}

/// Wrap a body stream so it yields [`BlobError::Cancelled`] once the token
/// fires, instead of further chunks.
pub fn guard_stream(stream: BlobStream, cancel: Option<&CancellationToken>) -> BlobStream {
    match cancel {
        None => stream,
        Some(token) => {
            let token = token.clone();
            let mut stopped = false;
            stream
                .map(move |chunk| {
                    if token.is_cancelled() {
                        Err(BlobError::Cancelled)
                    } else {
                        chunk
                    }
                })
                .take_while(move |chunk| {
                    let keep = !stopped;
                    if chunk.as_ref().is_err_and(BlobError::is_cancelled) {
                        stopped = true;
                    }
                    futures::future::ready(keep)
                })
                .boxed()
        }
    }
}

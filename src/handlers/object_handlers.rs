//! HTTP handlers for object and directory operations.
//! Streams object bodies out and delegates storage concerns to the
//! `BlobStorage` backend held in `AppState`.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        metadata::ObjectMetadata,
        object::{DEFAULT_CONTENT_TYPE, ObjectInfo, PutObject},
    },
    services::blob_storage::{cancellable, deadline_token},
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

/// Request headers with this prefix become object metadata, and stored
/// metadata is returned under the same prefix.
pub const META_HEADER_PREFIX: &str = "x-blob-meta-";

#[derive(Debug, Serialize)]
pub struct RemoveDirectoryResponse {
    pub prefix: String,
    pub deleted: usize,
}

/// A deadline token for one request plus a guard that stops its timer once
/// the handler is done with it.
fn request_token(state: &AppState) -> (CancellationToken, DropGuard) {
    let token = deadline_token(state.request_timeout);
    let guard = token.clone().drop_guard();
    (token, guard)
}

/// PUT `/objects/{*key}` — upload (or replace) an object.
pub async fn upload_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let request = PutObject::new(key, body, content_type)
        .with_metadata_map(metadata_from_headers(&headers));
    let (token, _timer) = request_token(&state);
    let info = state.storage.put_object(request, Some(&token)).await?;

    let mut response = Response::new(Body::empty());
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", info.etag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// GET `/objects/{*key}` — download an object as a streaming response.
///
/// The request deadline covers opening the object, not the transfer.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (token, _timer) = request_token(&state);
    let object = cancellable(Some(&token), state.storage.get_object(&key, None)).await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &object.info);
    *response.body_mut() = Body::from_stream(object.into_stream());
    Ok(response)
}

/// HEAD `/objects/{*key}` — same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (token, _timer) = request_token(&state);
    let object = state.storage.get_object(&key, Some(&token)).await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &object.info);
    Ok(response)
}

/// DELETE `/objects/{*key}` — idempotent delete.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    let (token, _timer) = request_token(&state);
    state.storage.delete_object(&key, Some(&token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE `/directories/{*prefix}` — delete every key starting with `prefix`.
pub async fn remove_directory(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<RemoveDirectoryResponse>, AppError> {
    let (token, _timer) = request_token(&state);
    let deleted = state.storage.remove_directory(&prefix, Some(&token)).await?;
    Ok(Json(RemoveDirectoryResponse { prefix, deleted }))
}

fn metadata_from_headers(headers: &HeaderMap) -> ObjectMetadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let meta_name = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            let meta_value = value.to_str().ok()?;
            Some((meta_name.to_string(), meta_value.to_string()))
        })
        .collect()
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size_bytes));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", info.etag)) {
        headers.insert(header::ETAG, value);
    }

    let http_date = info
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&http_date) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    for (name, value) in &info.metadata {
        let header_name = HeaderName::try_from(format!("{}{}", META_HEADER_PREFIX, name));
        match (header_name, HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("metadata entry {:?} of {} is not a valid header", name, info.key),
        }
    }
}

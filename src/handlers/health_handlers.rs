//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips a check object through the backend

use crate::{
    handlers::AppState,
    models::object::PutObject,
    services::blob_storage::{BlobResult, deadline_token},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHECK_BODY: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Very small liveness check — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Writes, reads back and deletes a uniquely named check object under
/// `.readyz/`. HTTP 200 when the round trip succeeds, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let token = deadline_token(state.request_timeout);
    let _timer = token.clone().drop_guard();
    let check_key = format!(".readyz/{}", Uuid::new_v4());

    let storage_check = match round_trip(&state, &check_key, &token).await {
        Ok(true) => (true, None::<String>),
        Ok(false) => (false, Some("round-trip content mismatch".to_string())),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // best-effort cleanup even when the round trip failed halfway
    if !storage_check.0 {
        let _ = state.storage.delete_object(&check_key, None).await;
    }

    let overall_ok = storage_check.0;
    let mut checks = HashMap::new();
    checks.insert(
        "storage",
        CheckStatus {
            ok: storage_check.0,
            error: storage_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn round_trip(state: &AppState, key: &str, token: &CancellationToken) -> BlobResult<bool> {
    let storage = &state.storage;
    storage
        .put_object(PutObject::new(key, CHECK_BODY, "text/plain"), Some(token))
        .await?;
    let body = storage.get_object(key, Some(token)).await?.into_bytes().await?;
    storage.delete_object(key, Some(token)).await?;
    Ok(body.as_ref() == CHECK_BODY)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

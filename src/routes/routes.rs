//! Defines routes for the development HTTP front over a `BlobStorage` backend.
//!
//! ## Structure
//! - **Object-level endpoints**
//!   - `PUT    /objects/{*key}` — upload object (`x-blob-meta-*` headers become metadata)
//!   - `GET    /objects/{*key}` — download object
//!   - `HEAD   /objects/{*key}` — retrieve metadata only
//!   - `DELETE /objects/{*key}` — delete object (idempotent)
//!
//! - **Directory-level endpoints**
//!   - `DELETE /directories/{*prefix}` — delete every key starting with `prefix`
//!
//! The wildcard `*key` allows nested keys like `graphs/2025/schema.graphql`.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    object_handlers::{delete_object, get_object, head_object, remove_directory, upload_object},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, put},
};

/// Build and return the router for all routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/objects/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route("/directories/{*prefix}", delete(remove_directory))
}

/// Routes bound to `state`, with the upload size limit applied.
pub fn app(state: AppState, max_body_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

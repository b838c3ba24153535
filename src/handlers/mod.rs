//! HTTP handlers over a shared `BlobStorage` backend.

use crate::services::blob_storage::BlobStorage;
use std::{sync::Arc, time::Duration};

pub mod health_handlers;
pub mod object_handlers;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn BlobStorage>,

    /// Deadline applied to each storage call made on behalf of a request.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(storage: Arc<dyn BlobStorage>, request_timeout: Duration) -> Self {
        Self {
            storage,
            request_timeout,
        }
    }
}

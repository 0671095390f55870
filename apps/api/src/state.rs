use std::sync::Arc;

use crate::storage::BlobStore;
use crate::store::CandidateStore;
use crate::workflow::Engine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: CandidateStore,
    pub blobs: BlobStore,
    pub engine: Arc<Engine>,
}

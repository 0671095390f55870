pub mod candidates;
pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};

use crate::intake;
use crate::rescan;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/candidates",
            post(intake::handle_intake).get(candidates::list_candidates),
        )
        .route("/candidates/:id", get(candidates::get_candidate))
        .route(
            "/candidates/:id/status",
            post(candidates::update_candidate_status),
        )
        .route("/candidates/:id/file", get(candidates::download_cv))
        .route("/rescan", post(rescan::handle_rescan))
        .route("/workflow-status", get(candidates::workflow_status))
        // Multipart bodies carry the document; leave headroom over the
        // per-document ceiling enforced in the intake handler.
        .layer(DefaultBodyLimit::max(intake::MAX_DOCUMENT_BYTES + 64 * 1024))
        .with_state(state)
}

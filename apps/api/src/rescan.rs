use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RescanResponse {
    pub message: String,
    pub count: usize,
}

/// POST /rescan
///
/// Reconciliation: finds candidates whose processing never started, failed,
/// or left no summary, marks them processing, and re-requests workflow runs
/// without waiting for completion. Safe to call while runs from intake or a
/// prior rescan are still active — the engine dedups per candidate id, so a
/// lost race simply isn't counted.
pub async fn handle_rescan(State(state): State<AppState>) -> Result<Json<RescanResponse>, AppError> {
    let stale = state.store.find_unprocessed().await?;
    if stale.is_empty() {
        return Ok(Json(RescanResponse {
            message: "No CVs need processing".to_string(),
            count: 0,
        }));
    }

    state.store.mark_processing(&stale).await?;

    let mut scheduled = 0;
    for candidate_id in stale {
        if state.engine.clone().start(candidate_id) {
            scheduled += 1;
        }
    }

    info!("rescan scheduled {scheduled} workflow runs");
    Ok(Json(RescanResponse {
        message: format!("Processing {scheduled} CVs"),
        count: scheduled,
    }))
}

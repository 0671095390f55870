use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::candidate::{CandidateRow, Status};
use crate::state::AppState;
use crate::storage;

/// GET /candidates
pub async fn list_candidates(
    State(state): State<AppState>,
) -> Result<Json<Vec<CandidateRow>>, AppError> {
    Ok(Json(state.store.list().await?))
}

/// GET /candidates/:id
pub async fn get_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateRow>, AppError> {
    let candidate = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Candidate {id} not found")))?;
    Ok(Json(candidate))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: Status,
}

/// POST /candidates/:id/status
///
/// Human-writer path: updates the recruiting stage only. The cv/ha
/// sub-documents are owned by the workflow engine and are not read, not
/// rewritten, not touched here.
pub async fn update_candidate_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Result<Json<CandidateRow>, AppError> {
    let updated = state
        .store
        .update_status(id, req.status)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Candidate {id} not found")))?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub file_name: Option<String>,
}

/// GET /candidates/:id/file?fileName=…
pub async fn download_cv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let file_name = query
        .file_name
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::Validation("missing fileName parameter".to_string()))?;

    if state.store.get(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Candidate {id} not found")));
    }

    let bytes = state
        .blobs
        .get(id, &file_name)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("File {file_name} not found")))?;

    let headers = [
        (
            header::CONTENT_TYPE,
            storage::content_type_for(&file_name).to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, bytes))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusQuery {
    pub instance_id: Option<String>,
}

/// GET /workflow-status?instanceId=…
///
/// The instance id is the candidate id — the engine's run-identity key.
pub async fn workflow_status(
    State(state): State<AppState>,
    Query(query): Query<WorkflowStatusQuery>,
) -> Result<String, AppError> {
    let raw = query
        .instance_id
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation("missing instanceId parameter".to_string()))?;
    let candidate_id: Uuid = raw
        .parse()
        .map_err(|_| AppError::Validation("instanceId must be a valid candidate id".to_string()))?;

    let step = state
        .store
        .run_status(candidate_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Workflow {candidate_id} not found")))?;
    Ok(format!("Workflow status: {step}"))
}

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::candidate::{CandidateRow, Cv, Ha};
use crate::state::AppState;
use crate::storage;
use crate::store::NewCandidate;

/// Hard ceiling on accepted document payloads.
pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeResponse {
    pub candidate_id: Uuid,
    pub candidate: CandidateRow,
}

/// POST /candidates
///
/// Accepts a multipart submission (name, surname, email, file), dedups by
/// identity fingerprint, persists the record and document, and requests a
/// workflow run. Responds as soon as the record and blob are durable — it
/// never waits on a processing step.
pub async fn handle_intake(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IntakeResponse>, AppError> {
    let mut name = None;
    let mut surname = None;
    let mut email = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart payload: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => name = Some(read_text(field).await?),
            "surname" => surname = Some(read_text(field).await?),
            "email" => email = Some(read_text(field).await?),
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation("file field must carry a filename".to_string())
                    })?;
                let data = field.bytes().await.map_err(|e| {
                    AppError::Validation(format!("could not read uploaded file: {e}"))
                })?;
                file = Some((file_name, data.to_vec()));
            }
            _ => {} // ignore unknown fields
        }
    }

    let name = require_field(name, "name")?;
    let surname = require_field(surname, "surname")?;
    let email = require_field(email, "email")?;
    let (file_name, bytes) =
        file.ok_or_else(|| AppError::Validation("no CV file provided".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("uploaded CV file is empty".to_string()));
    }
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(AppError::Validation(format!(
            "CV file exceeds the {MAX_DOCUMENT_BYTES} byte limit"
        )));
    }

    let fingerprint = identity_fingerprint(&name, &surname, &email);
    if state
        .store
        .find_id_by_fingerprint(&fingerprint)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "a candidate with this identity already exists".to_string(),
        ));
    }

    let candidate_id = Uuid::new_v4();
    let cv = Cv::new(file_name.clone(), content_digest(&bytes));

    // DB insert first: a store failure aborts before any blob is written,
    // and the blob put itself is an idempotent overwrite safe to retry.
    let candidate = state
        .store
        .insert(NewCandidate {
            id: candidate_id,
            name,
            surname,
            email,
            fingerprint,
            cv,
            ha: Ha::default(),
        })
        .await?;
    state
        .blobs
        .put(
            candidate_id,
            &file_name,
            bytes,
            storage::content_type_for(&file_name),
        )
        .await
        .map_err(|e| AppError::Storage(e.to_string()))?;

    // Fire-and-forget: callers poll /candidates/{id} to observe completion.
    state.engine.clone().start(candidate_id);

    Ok(Json(IntakeResponse {
        candidate_id,
        candidate,
    }))
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| AppError::Validation(format!("invalid multipart payload: {e}")))
}

fn require_field(value: Option<String>, label: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::Validation(format!(
            "missing required field '{label}'"
        ))),
    }
}

/// Deterministic dedup key over the applicant identity fields.
/// Case and surrounding whitespace are normalized away so re-submissions of
/// the same person always collide.
pub fn identity_fingerprint(name: &str, surname: &str, email: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [name, surname, email] {
        hasher.update(part.trim().to_lowercase().as_bytes());
        hasher.update(b"|");
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 content digest of the uploaded document bytes.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_normalized() {
        let a = identity_fingerprint("Ada", "Lovelace", "ada@example.com");
        let b = identity_fingerprint("  ada ", "LOVELACE", "Ada@Example.com ");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_identities() {
        let a = identity_fingerprint("Ada", "Lovelace", "ada@example.com");
        let b = identity_fingerprint("Ada", "Lovelace", "ada@example.org");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_separates_fields() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = identity_fingerprint("ab", "c", "x@example.com");
        let b = identity_fingerprint("a", "bc", "x@example.com");
        assert_ne!(a, b);
    }

    #[test]
    fn content_digest_matches_known_vector() {
        assert_eq!(
            content_digest(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn require_field_rejects_missing_and_blank() {
        assert!(require_field(None, "name").is_err());
        assert!(require_field(Some(String::new()), "name").is_err());
        assert_eq!(require_field(Some("Ada".into()), "name").unwrap(), "Ada");
    }
}

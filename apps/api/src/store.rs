use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::candidate::{CandidateRow, Cv, Decision, Eval, Ha, Status};
use crate::workflow::{CvSnapshot, Step, WorkflowStore};

/// Relational candidate store. Writes are split by role: the Status API path
/// touches `status`/`last_updated` only, while the workflow path (the
/// `WorkflowStore` impl below) touches `cv`/`ai_decision`/`processing_error`
/// only — one `jsonb_set` key per step, never a whole-row rewrite. The two
/// field sets are disjoint, so neither writer can clobber the other.
#[derive(Clone)]
pub struct CandidateStore {
    pool: PgPool,
}

/// Everything the intake handler persists for a fresh submission.
pub struct NewCandidate {
    pub id: Uuid,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub fingerprint: String,
    pub cv: Cv,
    pub ha: Ha,
}

impl CandidateStore {
    pub fn new(pool: PgPool) -> Self {
        CandidateStore { pool }
    }

    /// Inserts a candidate + CV atomically. A fingerprint collision (the
    /// UNIQUE constraint backstopping the intake pre-check) maps to Conflict.
    pub async fn insert(&self, candidate: NewCandidate) -> Result<CandidateRow, AppError> {
        sqlx::query_as::<_, CandidateRow>(
            r#"
            INSERT INTO candidates
                (id, name, surname, email, fingerprint, decision, ai_decision, status, cv, ha)
            VALUES ($1, $2, $3, $4, $5, 'maybe', 'maybe', 'applied', $6, $7)
            RETURNING *
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.name)
        .bind(&candidate.surname)
        .bind(&candidate.email)
        .bind(&candidate.fingerprint)
        .bind(Json(&candidate.cv))
        .bind(Json(&candidate.ha))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return AppError::Conflict(
                        "a candidate with this identity already exists".to_string(),
                    );
                }
            }
            AppError::Database(e)
        })
    }

    pub async fn find_id_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Uuid>, AppError> {
        Ok(
            sqlx::query_scalar("SELECT id FROM candidates WHERE fingerprint = $1")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list(&self) -> Result<Vec<CandidateRow>, AppError> {
        Ok(sqlx::query_as::<_, CandidateRow>(
            "SELECT * FROM candidates ORDER BY last_updated DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get(&self, candidate_id: Uuid) -> Result<Option<CandidateRow>, AppError> {
        Ok(
            sqlx::query_as::<_, CandidateRow>("SELECT * FROM candidates WHERE id = $1")
                .bind(candidate_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Status-writer role: last-writer-wins on the human pipeline stage.
    /// Deliberately blind to `cv`/`ha` — those belong to the workflow writer.
    pub async fn update_status(
        &self,
        candidate_id: Uuid,
        status: Status,
    ) -> Result<Option<CandidateRow>, AppError> {
        Ok(sqlx::query_as::<_, CandidateRow>(
            "UPDATE candidates SET status = $2, last_updated = now() WHERE id = $1 RETURNING *",
        )
        .bind(candidate_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Candidates the rescan reconciler should re-schedule: never started,
    /// failed, or missing their summary.
    pub async fn find_unprocessed(&self) -> Result<Vec<Uuid>, AppError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT id FROM candidates
            WHERE cv->>'fileStatus' IN ('pending', 'failed')
               OR COALESCE(cv->>'summary', '') = ''
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Rescan re-entry: failed/pending -> processing, clearing the stale
    /// error reason.
    pub async fn mark_processing(&self, candidate_ids: &[Uuid]) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE candidates
            SET cv = jsonb_set(cv, '{fileStatus}', '"processing"'),
                processing_error = NULL
            WHERE id = ANY($1)
            "#,
        )
        .bind(candidate_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current step of a candidate's workflow run, if one was ever recorded.
    pub async fn run_status(&self, candidate_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(
            sqlx::query_scalar("SELECT step FROM workflow_runs WHERE candidate_id = $1")
                .bind(candidate_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

#[async_trait]
impl WorkflowStore for CandidateStore {
    async fn load_cv(&self, candidate_id: Uuid) -> anyhow::Result<Option<CvSnapshot>> {
        let cv: Option<Json<Cv>> = sqlx::query_scalar("SELECT cv FROM candidates WHERE id = $1")
            .bind(candidate_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cv.map(|Json(cv)| CvSnapshot {
            file_name: cv.file_name,
            summary: cv.summary,
            grades_eval: cv.grades_eval,
            file_status: cv.file_status,
        }))
    }

    async fn write_summary(&self, candidate_id: Uuid, summary: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE candidates SET cv = jsonb_set(cv, '{summary}', to_jsonb($2::text)) WHERE id = $1",
        )
        .bind(candidate_id)
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_grades(&self, candidate_id: Uuid, grades: &[Eval]) -> anyhow::Result<()> {
        sqlx::query("UPDATE candidates SET cv = jsonb_set(cv, '{gradesEval}', $2) WHERE id = $1")
            .bind(candidate_id)
            .bind(Json(grades))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, candidate_id: Uuid, ai_decision: Decision) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE candidates
            SET cv = jsonb_set(cv, '{fileStatus}', '"completed"'),
                ai_decision = $2,
                processing_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(candidate_id)
        .bind(ai_decision.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, candidate_id: Uuid, reason: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE candidates
            SET cv = jsonb_set(cv, '{fileStatus}', '"failed"'),
                processing_error = $2
            WHERE id = $1
            "#,
        )
        .bind(candidate_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_step(
        &self,
        candidate_id: Uuid,
        step: Step,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (candidate_id, step, error, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (candidate_id)
            DO UPDATE SET step = EXCLUDED.step, error = EXCLUDED.error, updated_at = now()
            "#,
        )
        .bind(candidate_id)
        .bind(step.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Human (and machine-suggested) hiring verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    StrongNo,
    No,
    Maybe,
    Yes,
    StrongYes,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::StrongNo => "strong_no",
            Decision::No => "no",
            Decision::Maybe => "maybe",
            Decision::Yes => "yes",
            Decision::StrongYes => "strong_yes",
        }
    }
}

/// Recruiting-pipeline stage. Owned by the Status API writer role; the
/// workflow engine never touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Applied,
    Review,
    Interview1,
    Interview2,
    Ha,
    Offer,
    Hired,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Applied => "applied",
            Status::Review => "review",
            Status::Interview1 => "interview1",
            Status::Interview2 => "interview2",
            Status::Ha => "ha",
            Status::Offer => "offer",
            Status::Hired => "hired",
            Status::Rejected => "rejected",
        }
    }
}

/// Machine pipeline state of document processing, independent of `Status`.
/// Legal moves: pending -> processing -> {completed, failed}; rescan re-entry
/// moves failed/pending back to processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One graded criterion result produced by the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eval {
    pub name: String,
    pub reason: String,
    pub value: String,
}

/// A grading rubric entry carried by the home-assignment sub-entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub name: String,
    pub description: String,
    pub scale: String,
}

/// CV sub-document, owned 1:1 by a candidate and stored as JSONB.
/// `summary`, `grades_eval` and `file_status` are written exclusively by the
/// workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cv {
    pub id: Uuid,
    pub phone: String,
    pub summary: String,
    pub grades_eval: Vec<Eval>,
    pub file_name: String,
    pub file_hash: String,
    pub file_status: FileStatus,
}

impl Cv {
    /// Initial CV state at intake: the document is stored and immediately
    /// queued, so processing starts in `processing` with empty results.
    pub fn new(file_name: String, file_hash: String) -> Self {
        Cv {
            id: Uuid::new_v4(),
            phone: String::new(),
            summary: String::new(),
            grades_eval: Vec::new(),
            file_name,
            file_hash,
            file_status: FileStatus::Processing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaStatus {
    Completed,
    InProgress,
    NotStarted,
}

/// Home-assignment sub-document. Exists from intake onward but is not part
/// of the processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ha {
    pub id: Uuid,
    pub repo: String,
    pub description: String,
    pub status: HaStatus,
    pub grades: Vec<Grade>,
    pub grades_eval: Vec<Eval>,
}

impl Default for Ha {
    fn default() -> Self {
        Ha {
            id: Uuid::new_v4(),
            repo: String::new(),
            description: String::new(),
            status: HaStatus::NotStarted,
            grades: Vec::new(),
            grades_eval: Vec::new(),
        }
    }
}

/// A full candidate row. `decision`/`ai_decision`/`status` are stored as TEXT
/// and kept as strings here; the typed enums validate writes at the API edge.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRow {
    pub id: Uuid,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub fingerprint: String,
    pub decision: String,
    pub ai_decision: String,
    pub status: String,
    pub cv: Json<Cv>,
    pub ha: Json<Ha>,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

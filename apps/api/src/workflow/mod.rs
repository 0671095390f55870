/// Workflow Engine — durable, crash-resumable CV processing.
///
/// One run per candidate id walks Retrieving -> Summarizing -> Grading ->
/// Finalizing -> Completed, with Failed reachable from any non-terminal
/// state. Step results are checkpointed to the candidate store before the
/// engine advances, so a re-entered run continues from the first step whose
/// checkpoint is missing and never re-executes a completed step.
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::llm_client::{Extractor, LlmError};
use crate::models::candidate::{Decision, Eval, FileStatus};

/// Attempt ceiling per step for transient extraction failures.
const MAX_STEP_ATTEMPTS: u32 = 3;
/// Backoff starts here and doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Caller-side timeout on every extraction call; expiry counts as transient.
const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(90);
/// Upper bound on concurrently executing runs across all candidates.
const MAX_CONCURRENT_RUNS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retrieving,
    Summarizing,
    Grading,
    Finalizing,
    Completed,
    Failed,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Retrieving => "retrieving",
            Step::Summarizing => "summarizing",
            Step::Grading => "grading",
            Step::Finalizing => "finalizing",
            Step::Completed => "completed",
            Step::Failed => "failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    /// Cannot succeed on retry (missing blob, undecodable document).
    #[error("{0}")]
    Fatal(String),

    /// Worth retrying; recorded as the failure reason past the ceiling.
    #[error("{0}")]
    Transient(String),
}

/// The slice of a candidate's cv the engine needs between steps.
#[derive(Debug, Clone)]
pub struct CvSnapshot {
    pub file_name: String,
    pub summary: String,
    pub grades_eval: Vec<Eval>,
    pub file_status: FileStatus,
}

/// Machine-writer persistence operations. Every write is an idempotent
/// overwrite of a single field, so re-applying after a crash is harmless.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_cv(&self, candidate_id: Uuid) -> anyhow::Result<Option<CvSnapshot>>;
    async fn write_summary(&self, candidate_id: Uuid, summary: &str) -> anyhow::Result<()>;
    async fn write_grades(&self, candidate_id: Uuid, grades: &[Eval]) -> anyhow::Result<()>;
    async fn mark_completed(&self, candidate_id: Uuid, ai_decision: Decision) -> anyhow::Result<()>;
    async fn mark_failed(&self, candidate_id: Uuid, reason: &str) -> anyhow::Result<()>;
    async fn record_step(
        &self,
        candidate_id: Uuid,
        step: Step,
        error: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Read access to stored documents, keyed `{candidateId}/{fileName}`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, candidate_id: Uuid, file_name: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

pub struct Engine {
    store: Arc<dyn WorkflowStore>,
    documents: Arc<dyn DocumentStore>,
    extractor: Arc<dyn Extractor>,
    /// Run-identity registry: at most one active run per candidate id.
    active: Mutex<HashSet<Uuid>>,
    permits: Semaphore,
}

impl Engine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        documents: Arc<dyn DocumentStore>,
        extractor: Arc<dyn Extractor>,
    ) -> Arc<Self> {
        Arc::new(Engine {
            store,
            documents,
            extractor,
            active: Mutex::new(HashSet::new()),
            permits: Semaphore::new(MAX_CONCURRENT_RUNS),
        })
    }

    /// Requests a workflow run for a candidate. Returns false (and does
    /// nothing) when a run for this id is already in flight — requesting a
    /// run is idempotent, never a duplicate. The spawned run outlives the
    /// caller; intake and rescan fire-and-forget.
    pub fn start(self: Arc<Self>, candidate_id: Uuid) -> bool {
        {
            let mut active = self.active.lock().expect("run registry lock poisoned");
            if !active.insert(candidate_id) {
                return false;
            }
        }
        let engine = self;
        tokio::spawn(async move {
            engine.run(candidate_id).await;
            engine
                .active
                .lock()
                .expect("run registry lock poisoned")
                .remove(&candidate_id);
        });
        true
    }

    #[allow(dead_code)]
    pub fn is_active(&self, candidate_id: Uuid) -> bool {
        self.active
            .lock()
            .expect("run registry lock poisoned")
            .contains(&candidate_id)
    }

    /// Drives a single run to a terminal state. Failures are recorded on the
    /// candidate, never propagated — there is no attended caller.
    async fn run(&self, candidate_id: Uuid) {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed, process shutting down
        };
        info!("workflow run started for candidate {candidate_id}");
        match self.execute(candidate_id).await {
            Ok(()) => info!("workflow run completed for candidate {candidate_id}"),
            Err(step_err) => {
                let reason = step_err.to_string();
                warn!("workflow run for candidate {candidate_id} failed: {reason}");
                if let Err(e) = self.store.mark_failed(candidate_id, &reason).await {
                    error!("could not record failure for candidate {candidate_id}: {e}");
                }
                if let Err(e) = self
                    .store
                    .record_step(candidate_id, Step::Failed, Some(&reason))
                    .await
                {
                    error!("could not record failed step for candidate {candidate_id}: {e}");
                }
            }
        }
    }

    async fn execute(&self, candidate_id: Uuid) -> Result<(), StepError> {
        self.checkpoint(candidate_id, Step::Retrieving).await?;
        let cv = self
            .store
            .load_cv(candidate_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| StepError::Fatal(format!("candidate {candidate_id} does not exist")))?;

        if cv.file_status == FileStatus::Completed {
            // Re-entry after completion is a no-op.
            self.checkpoint(candidate_id, Step::Completed).await?;
            return Ok(());
        }

        let needs_summary = cv.summary.is_empty();
        let needs_grades = cv.grades_eval.is_empty();

        let mut grades = cv.grades_eval;
        if needs_summary || needs_grades {
            let text = self.fetch_document(candidate_id, &cv.file_name).await?;

            if needs_summary {
                self.checkpoint(candidate_id, Step::Summarizing).await?;
                let summary = self
                    .with_retries("summarize", || self.extractor.summarize(&text))
                    .await?;
                self.store
                    .write_summary(candidate_id, &summary)
                    .await
                    .map_err(store_error)?;
            }

            if needs_grades {
                self.checkpoint(candidate_id, Step::Grading).await?;
                grades = self
                    .with_retries("grade", || self.extractor.grade(&text))
                    .await?;
                self.store
                    .write_grades(candidate_id, &grades)
                    .await
                    .map_err(store_error)?;
            }
        }

        self.checkpoint(candidate_id, Step::Finalizing).await?;
        self.store
            .mark_completed(candidate_id, suggest_decision(&grades))
            .await
            .map_err(store_error)?;
        self.checkpoint(candidate_id, Step::Completed).await?;
        Ok(())
    }

    async fn fetch_document(
        &self,
        candidate_id: Uuid,
        file_name: &str,
    ) -> Result<String, StepError> {
        let bytes = self
            .documents
            .fetch(candidate_id, file_name)
            .await
            .map_err(|e| StepError::Transient(format!("document fetch failed: {e}")))?;
        // A missing blob cannot heal on retry.
        let bytes = bytes.ok_or_else(|| {
            StepError::Fatal(format!(
                "document {candidate_id}/{file_name} missing from blob store"
            ))
        })?;
        decode_document(file_name, &bytes)
    }

    /// Runs an extraction call under the step timeout, retrying transient
    /// failures with exponential backoff up to the attempt ceiling.
    async fn with_retries<T, F, Fut>(&self, step: &str, mut call: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_error = String::new();
        for attempt in 1..=MAX_STEP_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match tokio::time::timeout(EXTRACTION_TIMEOUT, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!("{step} attempt {attempt}/{MAX_STEP_ATTEMPTS} failed: {e}");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!("{step} attempt {attempt}/{MAX_STEP_ATTEMPTS} timed out");
                    last_error = "extraction call timed out".to_string();
                }
            }
        }
        Err(StepError::Transient(format!(
            "{step} failed after {MAX_STEP_ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn checkpoint(&self, candidate_id: Uuid, step: Step) -> Result<(), StepError> {
        self.store
            .record_step(candidate_id, step, None)
            .await
            .map_err(|e| StepError::Transient(format!("could not record step {step}: {e}")))
    }
}

fn store_error(e: anyhow::Error) -> StepError {
    StepError::Transient(format!("candidate store write failed: {e}"))
}

/// Decodes stored document bytes to text: pdf-extract for PDFs, lossy UTF-8
/// for everything else.
fn decode_document(file_name: &str, bytes: &[u8]) -> Result<String, StepError> {
    let is_pdf = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        return pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| StepError::Fatal(format!("could not extract text from PDF: {e}")));
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Score-vote over the graded eval values to suggest a hiring decision.
pub fn suggest_decision(grades: &[Eval]) -> Decision {
    if grades.is_empty() {
        return Decision::Maybe;
    }
    let total: i32 = grades
        .iter()
        .map(|e| match e.value.as_str() {
            "strong_yes" => 2,
            "yes" => 1,
            "no" => -1,
            "strong_no" => -2,
            _ => 0,
        })
        .sum();
    let avg = total as f64 / grades.len() as f64;
    if avg >= 1.5 {
        Decision::StrongYes
    } else if avg >= 0.5 {
        Decision::Yes
    } else if avg > -0.5 {
        Decision::Maybe
    } else if avg > -1.5 {
        Decision::No
    } else {
        Decision::StrongNo
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct MemStore {
        cvs: Mutex<HashMap<Uuid, CvSnapshot>>,
        ai_decisions: Mutex<HashMap<Uuid, Decision>>,
        failures: Mutex<Vec<(Uuid, String)>>,
        steps: Mutex<Vec<Step>>,
        completions: AtomicUsize,
    }

    impl MemStore {
        fn seed(&self, candidate_id: Uuid, cv: CvSnapshot) {
            self.cvs.lock().unwrap().insert(candidate_id, cv);
        }

        fn cv(&self, candidate_id: Uuid) -> CvSnapshot {
            self.cvs.lock().unwrap()[&candidate_id].clone()
        }
    }

    #[async_trait]
    impl WorkflowStore for MemStore {
        async fn load_cv(&self, candidate_id: Uuid) -> anyhow::Result<Option<CvSnapshot>> {
            Ok(self.cvs.lock().unwrap().get(&candidate_id).cloned())
        }

        async fn write_summary(&self, candidate_id: Uuid, summary: &str) -> anyhow::Result<()> {
            let mut cvs = self.cvs.lock().unwrap();
            cvs.get_mut(&candidate_id).unwrap().summary = summary.to_string();
            Ok(())
        }

        async fn write_grades(&self, candidate_id: Uuid, grades: &[Eval]) -> anyhow::Result<()> {
            let mut cvs = self.cvs.lock().unwrap();
            cvs.get_mut(&candidate_id).unwrap().grades_eval = grades.to_vec();
            Ok(())
        }

        async fn mark_completed(
            &self,
            candidate_id: Uuid,
            ai_decision: Decision,
        ) -> anyhow::Result<()> {
            let mut cvs = self.cvs.lock().unwrap();
            cvs.get_mut(&candidate_id).unwrap().file_status = FileStatus::Completed;
            self.ai_decisions
                .lock()
                .unwrap()
                .insert(candidate_id, ai_decision);
            self.completions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn mark_failed(&self, candidate_id: Uuid, reason: &str) -> anyhow::Result<()> {
            let mut cvs = self.cvs.lock().unwrap();
            cvs.get_mut(&candidate_id).unwrap().file_status = FileStatus::Failed;
            self.failures
                .lock()
                .unwrap()
                .push((candidate_id, reason.to_string()));
            Ok(())
        }

        async fn record_step(
            &self,
            _candidate_id: Uuid,
            step: Step,
            _error: Option<&str>,
        ) -> anyhow::Result<()> {
            self.steps.lock().unwrap().push(step);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemDocs {
        objects: Mutex<HashMap<(Uuid, String), Vec<u8>>>,
    }

    impl MemDocs {
        fn seed(&self, candidate_id: Uuid, file_name: &str, bytes: &[u8]) {
            self.objects
                .lock()
                .unwrap()
                .insert((candidate_id, file_name.to_string()), bytes.to_vec());
        }
    }

    #[async_trait]
    impl DocumentStore for MemDocs {
        async fn fetch(
            &self,
            candidate_id: Uuid,
            file_name: &str,
        ) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .get(&(candidate_id, file_name.to_string()))
                .cloned())
        }
    }

    #[derive(Default)]
    struct MockExtractor {
        summarize_calls: AtomicUsize,
        grade_calls: AtomicUsize,
        fail_summarize: bool,
    }

    #[async_trait]
    impl Extractor for MockExtractor {
        async fn summarize(&self, _text: &str) -> Result<String, LlmError> {
            self.summarize_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_summarize {
                return Err(LlmError::EmptyContent);
            }
            Ok("Seasoned backend engineer with strong systems background.".to_string())
        }

        async fn grade(&self, _text: &str) -> Result<Vec<Eval>, LlmError> {
            self.grade_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                Eval {
                    name: "readability".to_string(),
                    reason: "Text is clear and well-structured".to_string(),
                    value: "yes".to_string(),
                },
                Eval {
                    name: "experience".to_string(),
                    reason: "Relevant work experience".to_string(),
                    value: "yes".to_string(),
                },
            ])
        }
    }

    fn pending_cv(file_name: &str) -> CvSnapshot {
        CvSnapshot {
            file_name: file_name.to_string(),
            summary: String::new(),
            grades_eval: Vec::new(),
            file_status: FileStatus::Processing,
        }
    }

    fn engine_with(
        store: Arc<MemStore>,
        docs: Arc<MemDocs>,
        extractor: Arc<MockExtractor>,
    ) -> Arc<Engine> {
        Engine::new(store, docs, extractor)
    }

    #[tokio::test]
    async fn successful_run_fills_summary_grades_and_completes() {
        let store = Arc::new(MemStore::default());
        let docs = Arc::new(MemDocs::default());
        let extractor = Arc::new(MockExtractor::default());
        let id = Uuid::new_v4();
        store.seed(id, pending_cv("resume.txt"));
        docs.seed(id, "resume.txt", b"ten years of rust and distributed systems");

        let engine = engine_with(store.clone(), docs, extractor.clone());
        engine.run(id).await;

        let cv = store.cv(id);
        assert_eq!(cv.file_status, FileStatus::Completed);
        assert!(!cv.summary.is_empty());
        assert_eq!(cv.grades_eval.len(), 2);
        assert_eq!(extractor.summarize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(extractor.grade_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.ai_decisions.lock().unwrap()[&id],
            Decision::Yes,
            "two 'yes' evals should suggest a yes"
        );
        assert_eq!(*store.steps.lock().unwrap().last().unwrap(), Step::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_summarize_marks_failed_without_grading() {
        let store = Arc::new(MemStore::default());
        let docs = Arc::new(MemDocs::default());
        let extractor = Arc::new(MockExtractor {
            fail_summarize: true,
            ..MockExtractor::default()
        });
        let id = Uuid::new_v4();
        store.seed(id, pending_cv("resume.txt"));
        docs.seed(id, "resume.txt", b"some resume text");

        let engine = engine_with(store.clone(), docs, extractor.clone());
        engine.run(id).await;

        let cv = store.cv(id);
        assert_eq!(cv.file_status, FileStatus::Failed);
        assert!(cv.summary.is_empty());
        assert!(cv.grades_eval.is_empty(), "grade must never run");
        assert_eq!(
            extractor.summarize_calls.load(Ordering::SeqCst),
            MAX_STEP_ATTEMPTS as usize
        );
        assert_eq!(extractor.grade_calls.load(Ordering::SeqCst), 0);
        let failures = store.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("summarize"));
    }

    #[tokio::test]
    async fn resume_skips_checkpointed_summary() {
        let store = Arc::new(MemStore::default());
        let docs = Arc::new(MemDocs::default());
        let extractor = Arc::new(MockExtractor::default());
        let id = Uuid::new_v4();
        // Simulates a crash right after the summary checkpoint was written.
        let mut cv = pending_cv("resume.txt");
        cv.summary = "Already summarized before the crash.".to_string();
        store.seed(id, cv);
        docs.seed(id, "resume.txt", b"some resume text");

        let engine = engine_with(store.clone(), docs, extractor.clone());
        engine.run(id).await;

        let cv = store.cv(id);
        assert_eq!(cv.file_status, FileStatus::Completed);
        assert_eq!(cv.summary, "Already summarized before the crash.");
        assert_eq!(
            extractor.summarize_calls.load(Ordering::SeqCst),
            0,
            "checkpointed step must not re-execute"
        );
        assert_eq!(extractor.grade_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_candidate_reentry_is_a_noop() {
        let store = Arc::new(MemStore::default());
        let docs = Arc::new(MemDocs::default());
        let extractor = Arc::new(MockExtractor::default());
        let id = Uuid::new_v4();
        let mut cv = pending_cv("resume.txt");
        cv.summary = "done".to_string();
        cv.grades_eval = vec![Eval {
            name: "readability".to_string(),
            reason: "clear".to_string(),
            value: "yes".to_string(),
        }];
        cv.file_status = FileStatus::Completed;
        store.seed(id, cv);

        let engine = engine_with(store.clone(), docs, extractor.clone());
        engine.run(id).await;

        assert_eq!(extractor.summarize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(extractor.grade_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.completions.load(Ordering::SeqCst), 0);
        assert_eq!(store.cv(id).file_status, FileStatus::Completed);
    }

    #[tokio::test]
    async fn missing_document_is_fatal_without_extraction() {
        let store = Arc::new(MemStore::default());
        let docs = Arc::new(MemDocs::default());
        let extractor = Arc::new(MockExtractor::default());
        let id = Uuid::new_v4();
        store.seed(id, pending_cv("resume.txt"));
        // no document seeded

        let engine = engine_with(store.clone(), docs, extractor.clone());
        engine.run(id).await;

        let cv = store.cv(id);
        assert_eq!(cv.file_status, FileStatus::Failed);
        assert_eq!(extractor.summarize_calls.load(Ordering::SeqCst), 0);
        let failures = store.failures.lock().unwrap();
        assert!(failures[0].1.contains("missing from blob store"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_a_noop_and_yields_one_terminal_write() {
        let store = Arc::new(MemStore::default());
        let docs = Arc::new(MemDocs::default());
        let extractor = Arc::new(MockExtractor::default());
        let id = Uuid::new_v4();
        store.seed(id, pending_cv("resume.txt"));
        docs.seed(id, "resume.txt", b"some resume text");

        let engine = engine_with(store.clone(), docs, extractor.clone());
        assert!(engine.clone().start(id));
        assert!(
            !engine.clone().start(id),
            "second request for the same id is a no-op"
        );

        while engine.is_active(id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(store.completions.load(Ordering::SeqCst), 1);
        assert_eq!(store.cv(id).file_status, FileStatus::Completed);
        // Once the run has drained, a new request is accepted again.
        assert!(engine.clone().start(id));
        while engine.is_active(id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn decode_document_falls_back_to_lossy_utf8() {
        let text = decode_document("resume.txt", b"plain text resume").unwrap();
        assert_eq!(text, "plain text resume");
    }

    #[test]
    fn suggest_decision_score_votes() {
        let eval = |value: &str| Eval {
            name: "x".to_string(),
            reason: String::new(),
            value: value.to_string(),
        };
        assert_eq!(suggest_decision(&[]), Decision::Maybe);
        assert_eq!(
            suggest_decision(&[eval("strong_yes"), eval("strong_yes")]),
            Decision::StrongYes
        );
        assert_eq!(suggest_decision(&[eval("yes"), eval("maybe")]), Decision::Yes);
        assert_eq!(suggest_decision(&[eval("yes"), eval("no")]), Decision::Maybe);
        assert_eq!(suggest_decision(&[eval("no"), eval("no")]), Decision::No);
        assert_eq!(
            suggest_decision(&[eval("strong_no"), eval("strong_no")]),
            Decision::StrongNo
        );
        assert_eq!(suggest_decision(&[eval("gibberish")]), Decision::Maybe);
    }
}

//! Asynchronous job orchestration
//!
//! The [`JobManager`] owns a dedicated worker pool and drives one engine
//! run per job: validate inputs, persist the row as Processing, dispatch,
//! stream progress updates into the job store, persist the artifact, and
//! settle the row in a terminal state. Terminal states are sticky and all
//! row updates go through a per-job lock, so readers always observe a
//! monotonic status progression.
//!
//! Two rules matter most here:
//! - the artifact is stored *before* the row transitions to Completed, and
//! - an existing artifact heals a non-terminal row to Completed on read
//!   (reconciliation after a crash between those two steps).

use crate::cache::ComparisonCaches;
use crate::config::CompareConfig;
use crate::engine::{ComparisonEngine, Phase, RunContext};
use crate::error::{CompareError, Result};
use crate::match_documents::PageRenderer;
use crate::store::{ArtifactStore, Clock, DocumentStore, JobStore, SystemClock};
use crate::types::{ComparisonResult, Difference, DocumentPair, Job, JobStatus};
use crate::ProgressSink;
use dashmap::DashMap;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Shared orchestrator state, cloned into worker tasks
struct Shared {
    documents: Arc<dyn DocumentStore>,
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    config: CompareConfig,
    caches: ComparisonCaches,
    renderer: Option<Arc<dyn PageRenderer>>,
    cancel_flags: DashMap<Uuid, Arc<AtomicBool>>,
    active: DashMap<Uuid, ()>,
    job_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl Shared {
    fn job_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.job_locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply a mutation to a job row under its per-job lock
    ///
    /// Enforces stickiness and monotonicity: terminal rows never change
    /// state again, and a stale writer cannot move status backwards.
    /// Store failures are logged, not propagated, so a flaky row write
    /// never kills a running comparison.
    fn update_row(&self, id: Uuid, apply: impl FnOnce(&mut Job)) -> Option<Job> {
        let lock = self.job_lock(id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut row = self.jobs.get(id)?;
        let previous = row.status;
        apply(&mut row);

        if previous.is_terminal() && row.status != previous {
            return self.jobs.get(id);
        }
        if row.status.rank() < previous.rank() {
            row.status = previous;
        }
        row.updated_at = self.clock.now();
        if let Err(e) = self.jobs.update(&row) {
            warn!("progress update for job {} failed: {}", id, e);
        }
        Some(row)
    }

    fn mark_completed(&self, id: Uuid) -> Option<Job> {
        let now = self.clock.now();
        self.update_row(id, |row| {
            row.status = JobStatus::Completed;
            row.progress = 100;
            row.current_phase = Phase::Completed.label().to_string();
            row.error_message = None;
            row.completed_at = Some(now);
        })
    }

    fn mark_failed(&self, id: Uuid, message: String) {
        let now = self.clock.now();
        self.update_row(id, |row| {
            row.status = JobStatus::Failed;
            row.error_message = Some(message);
            row.completed_at = Some(now);
        });
    }

    fn mark_cancelled(&self, id: Uuid) {
        let now = self.clock.now();
        self.update_row(id, |row| {
            row.status = JobStatus::Cancelled;
            row.completed_at = Some(now);
        });
    }

    /// Fetch a row, healing it to Completed when its artifact already exists
    fn reconciled(&self, id: Uuid) -> Option<Job> {
        let row = self.jobs.get(id)?;
        if !row.status.is_terminal() && self.artifacts.exists(id) {
            info!("reconciling job {}: artifact exists, marking completed", id);
            return self.mark_completed(id);
        }
        Some(row)
    }

    fn deregister(&self, id: Uuid) {
        self.cancel_flags.remove(&id);
        self.active.remove(&id);
        self.job_locks.remove(&id);
    }
}

/// Progress sink writing engine phase updates into the job row
///
/// Each update lands in its own isolated row write; the engine never
/// learns whether it succeeded.
struct JobProgressSink {
    shared: Arc<Shared>,
    id: Uuid,
}

impl ProgressSink for JobProgressSink {
    fn update(&self, progress: u8, phase: Phase, completed_ops: u32, total_ops: u32) {
        let status = match phase {
            Phase::Initializing | Phase::LoadingDocuments => JobStatus::Processing,
            Phase::MatchingDocuments => JobStatus::DocumentMatching,
            Phase::ComparingPages | Phase::Aggregating => JobStatus::Comparing,
            Phase::Completed => JobStatus::Completed,
        };
        self.shared.update_row(self.id, |row| {
            row.status = status;
            row.progress = progress.min(100);
            row.current_phase = phase.label().to_string();
            row.completed_ops = completed_ops;
            if total_ops > 0 {
                row.total_ops = total_ops;
            }
        });
    }
}

/// Orchestrates comparison jobs over a dedicated worker pool
pub struct JobManager {
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
}

impl JobManager {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        config: CompareConfig,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .thread_name(|i| format!("compare-worker-{}", i))
            .build()
            .map_err(|e| CompareError::Internal(format!("worker pool: {}", e)))?;

        Ok(Self {
            shared: Arc::new(Shared {
                documents,
                jobs,
                artifacts,
                clock: Arc::new(SystemClock),
                config,
                caches: ComparisonCaches::new(),
                renderer: None,
                cancel_flags: DashMap::new(),
                active: DashMap::new(),
                job_locks: DashMap::new(),
            }),
            pool,
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        let shared = Arc::get_mut(&mut self.shared)
            .expect("with_renderer must be called before jobs are dispatched");
        shared.renderer = Some(renderer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::get_mut(&mut self.shared)
            .expect("with_clock must be called before jobs are dispatched");
        shared.clock = clock;
        self
    }

    /// Create a comparison job and dispatch it
    ///
    /// Both document ids are validated synchronously; an unknown id fails
    /// here without creating any row. The returned row is already
    /// persisted and in Processing.
    pub fn create(&self, base_document_id: &str, compare_document_id: &str) -> Result<Job> {
        let base = self
            .shared
            .documents
            .get(base_document_id)
            .ok_or_else(|| CompareError::DocumentNotFound(base_document_id.to_string()))?;
        let compare = self
            .shared
            .documents
            .get(compare_document_id)
            .ok_or_else(|| CompareError::DocumentNotFound(compare_document_id.to_string()))?;

        let now = self.shared.clock.now();
        let job = Job {
            id: Uuid::new_v4(),
            base_document_id: base_document_id.to_string(),
            compare_document_id: compare_document_id.to_string(),
            status: JobStatus::Processing,
            progress: 0,
            total_ops: 0,
            completed_ops: 0,
            current_phase: Phase::Initializing.label().to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.shared.jobs.insert(&job)?;

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.shared.cancel_flags.insert(job.id, Arc::clone(&cancel_flag));
        self.shared.active.insert(job.id, ());
        info!(
            "job {} created: {} vs {}",
            job.id, base_document_id, compare_document_id
        );

        let shared = Arc::clone(&self.shared);
        let id = job.id;
        self.pool.spawn(move || {
            run_job(shared, id, base.as_ref(), compare.as_ref(), cancel_flag);
        });

        Ok(job)
    }

    /// Current job row, after reconciliation
    pub fn status(&self, id: Uuid) -> Option<Job> {
        self.shared.reconciled(id)
    }

    pub fn is_in_progress(&self, id: Uuid) -> bool {
        self.shared
            .reconciled(id)
            .map(|job| !job.status.is_terminal())
            .unwrap_or(false)
    }

    pub fn is_completed(&self, id: Uuid) -> bool {
        self.shared
            .reconciled(id)
            .map(|job| job.status == JobStatus::Completed)
            .unwrap_or(false)
    }

    /// Stored result for a job, if one exists
    pub fn result(&self, id: Uuid) -> Option<Arc<ComparisonResult>> {
        self.shared.reconciled(id)?;
        if let Some(cached) = self.shared.caches.get_result(id) {
            return Some(cached);
        }
        let result = Arc::new(self.shared.artifacts.retrieve(id)?);
        self.shared.caches.put_result(id, Arc::clone(&result));
        Some(result)
    }

    /// Sub-document pairing of a completed job
    ///
    /// Served from the document-pairs cache; a miss falls back to the
    /// stored result and repopulates the cache.
    pub fn document_pairs(&self, id: Uuid) -> Option<Arc<Vec<DocumentPair>>> {
        if let Some(cached) = self.shared.caches.get_document_pairs(id) {
            return Some(cached);
        }
        let result = self.result(id)?;
        let pairs = Arc::new(result.document_pairs.clone());
        self.shared
            .caches
            .put_document_pairs(id, Arc::clone(&pairs));
        Some(pairs)
    }

    /// Differences recorded for one page pair of a completed job
    ///
    /// Returns an empty list for a valid pair key with no differences and
    /// None when the job has no readable result. Served from the bounded
    /// page-details cache.
    pub fn page_details(&self, id: Uuid, page_key: &str) -> Option<Arc<Vec<Difference>>> {
        if let Some(cached) = self.shared.caches.get_page_details(id, page_key) {
            return Some(cached);
        }
        let result = self.result(id)?;
        let details = Arc::new(
            result
                .differences_by_page
                .get(page_key)
                .cloned()
                .unwrap_or_default(),
        );
        self.shared
            .caches
            .put_page_details(id, page_key, Arc::clone(&details));
        Some(details)
    }

    /// Request cooperative cancellation
    ///
    /// Returns true when a running job was signalled. The worker notices
    /// the flag at its next checkpoint, finishes in-flight pages and
    /// settles the row as Cancelled; no artifact is written.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.shared.cancel_flags.get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!("job {} cancellation requested", id);
                true
            }
            None => false,
        }
    }

    /// External-facing status string for a job
    pub fn external_status(&self, id: Uuid) -> Option<&'static str> {
        self.status(id).map(|job| job.status.as_external())
    }
}

/// Single activation of a job: one engine run, one terminal transition
fn run_job(
    shared: Arc<Shared>,
    id: Uuid,
    base: &crate::types::Document,
    compare: &crate::types::Document,
    cancel_flag: Arc<AtomicBool>,
) {
    let sink = Arc::new(JobProgressSink {
        shared: Arc::clone(&shared),
        id,
    });
    let ctx = RunContext::new(
        cancel_flag,
        Some(shared.config.comparison.max_processing_minutes),
        sink,
    );

    let engine = ComparisonEngine::new(&shared.config);
    let engine = match &shared.renderer {
        Some(renderer) => engine.with_renderer(renderer.as_ref()),
        None => engine,
    };

    let outcome = engine.compare(id, base, compare, &ctx);

    match outcome {
        Ok(result) => {
            // artifact first; only a durable result may flip the row
            match shared.artifacts.store(id, &result) {
                Ok(()) => {
                    shared.caches.put_result(id, Arc::new(result));
                    shared.mark_completed(id);
                    info!("job {} completed", id);
                }
                Err(e) => {
                    error!("job {} artifact store failed: {}", id, e);
                    shared.mark_failed(id, e.to_string());
                }
            }
        }
        Err(e) if e.is_cancelled() => {
            info!("job {} cancelled", id);
            shared.mark_cancelled(id);
        }
        Err(e) => {
            error!("job {} failed: {}", id, e);
            shared.mark_failed(id, e.to_string());
        }
    }

    shared.deregister(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FsArtifactStore, MemoryDocumentStore, MemoryJobStore};
    use crate::types::{Document, PageContent};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn document(id: &str, pages: &[&str]) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{}.pdf", id),
            pages: pages.iter().map(|t| PageContent::text_only(*t)).collect(),
            metadata: BTreeMap::new(),
        }
    }

    struct Fixture {
        manager: JobManager,
        jobs: Arc<MemoryJobStore>,
        artifacts: Arc<FsArtifactStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(config: CompareConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let documents = Arc::new(MemoryDocumentStore::new());
        documents.insert(document("base", &["hello world content", "second page here"]));
        documents.insert(document("compare", &["hello world content", "second page here"]));
        let jobs = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(FsArtifactStore::new(dir.path()));
        let manager = JobManager::new(
            documents,
            Arc::clone(&jobs) as Arc<dyn JobStore>,
            Arc::clone(&artifacts) as Arc<dyn ArtifactStore>,
            config,
        )
        .unwrap();
        Fixture {
            manager,
            jobs,
            artifacts,
            _dir: dir,
        }
    }

    fn wait_terminal(manager: &JobManager, id: Uuid) -> Job {
        for _ in 0..500 {
            if let Some(job) = manager.status(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("job {} never reached a terminal state", id);
    }

    #[test]
    fn test_create_returns_processing_row() {
        let f = fixture(CompareConfig::default());
        let job = f.manager.create("base", "compare").unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 0);
        assert!(f.jobs.get(job.id).is_some());
        wait_terminal(&f.manager, job.id);
    }

    #[test]
    fn test_unknown_document_fails_without_creating_a_job() {
        let f = fixture(CompareConfig::default());
        let err = f.manager.create("base", "missing").unwrap_err();
        assert!(matches!(err, CompareError::DocumentNotFound(_)));
    }

    #[test]
    fn test_identical_documents_complete_with_clean_result() {
        let f = fixture(CompareConfig::default());
        let job = f.manager.create("base", "compare").unwrap();
        let done = wait_terminal(&f.manager, job.id);

        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.error_message.is_none());
        assert!(done.completed_at.is_some());
        assert!(f.manager.is_completed(job.id));
        assert!(!f.manager.is_in_progress(job.id));

        // a completed job always has a readable artifact
        assert!(f.artifacts.exists(job.id));
        let result = f.manager.result(job.id).unwrap();
        assert_eq!(result.id, job.id);
        assert_eq!(result.summary.total, 0);
        assert!((result.overall_similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_minute_budget_times_out() {
        let mut config = CompareConfig::default();
        config.comparison.max_processing_minutes = 0;
        let f = fixture(config);

        let job = f.manager.create("base", "compare").unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        let done = wait_terminal(&f.manager, job.id);
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_message.unwrap().contains("timed out"));
        assert!(!f.artifacts.exists(job.id));
    }

    #[test]
    fn test_cancel_ends_in_cancelled_without_artifact() {
        let f = fixture(CompareConfig::default());
        // enough pages that cancellation lands before completion
        let pages: Vec<String> = (0..200)
            .map(|i| format!("page {} with plenty of distinct words to score {}", i, i))
            .collect();
        let page_refs: Vec<&str> = pages.iter().map(String::as_str).collect();
        let docs = Arc::new(MemoryDocumentStore::new());
        docs.insert(document("big-a", &page_refs));
        docs.insert(document("big-b", &page_refs));
        let manager = JobManager::new(
            docs,
            Arc::new(MemoryJobStore::new()),
            Arc::clone(&f.artifacts) as Arc<dyn ArtifactStore>,
            CompareConfig::default(),
        )
        .unwrap();

        let job = manager.create("big-a", "big-b").unwrap();
        manager.cancel(job.id);
        let done = wait_terminal(&manager, job.id);

        // the worker may already have finished before the flag was seen
        if done.status == JobStatus::Cancelled {
            assert!(!f.artifacts.exists(job.id));
            assert!(manager.result(job.id).is_none());
        } else {
            assert_eq!(done.status, JobStatus::Completed);
        }
    }

    #[test]
    fn test_cancel_unknown_job_is_false() {
        let f = fixture(CompareConfig::default());
        assert!(!f.manager.cancel(Uuid::new_v4()));
    }

    #[test]
    fn test_reconciliation_heals_crashed_job() {
        let f = fixture(CompareConfig::default());
        let job = f.manager.create("base", "compare").unwrap();
        let done = wait_terminal(&f.manager, job.id);
        assert_eq!(done.status, JobStatus::Completed);

        // simulate a crash between artifact write and status update
        let mut stale = f.jobs.get(job.id).unwrap();
        stale.status = JobStatus::Comparing;
        stale.progress = 60;
        f.jobs.update(&stale).unwrap();

        let healed = f.manager.status(job.id).unwrap();
        assert_eq!(healed.status, JobStatus::Completed);
        assert_eq!(healed.progress, 100);
        assert!(f.manager.result(job.id).is_some());
    }

    #[test]
    fn test_cancelled_is_sticky_even_with_artifact() {
        let f = fixture(CompareConfig::default());
        let job = f.manager.create("base", "compare").unwrap();
        wait_terminal(&f.manager, job.id);

        // force a cancelled terminal row; the artifact still exists
        let mut row = f.jobs.get(job.id).unwrap();
        row.status = JobStatus::Cancelled;
        f.jobs.update(&row).unwrap();
        assert!(f.artifacts.exists(job.id));

        let seen = f.manager.status(job.id).unwrap();
        assert_eq!(seen.status, JobStatus::Cancelled);
        assert!(!f.manager.is_completed(job.id));
    }

    #[test]
    fn test_status_never_moves_backwards() {
        let f = fixture(CompareConfig::default());
        let job = f.manager.create("base", "compare").unwrap();
        let mut last_rank = 0u8;
        for _ in 0..500 {
            let row = f.manager.status(job.id).unwrap();
            assert!(row.status.rank() >= last_rank, "status moved backwards");
            last_rank = row.status.rank();
            if row.status.is_terminal() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_document_pairs_and_page_details_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let documents = Arc::new(MemoryDocumentStore::new());
        documents.insert(document("a", &["hello world"]));
        documents.insert(document("b", &["hello World"]));
        let manager = JobManager::new(
            documents,
            Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>,
            Arc::new(FsArtifactStore::new(dir.path())) as Arc<dyn ArtifactStore>,
            CompareConfig::default(),
        )
        .unwrap();

        let job = manager.create("a", "b").unwrap();
        wait_terminal(&manager, job.id);

        let pairs = manager.document_pairs(job.id).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].matched);
        // second read is served from the cache
        let again = manager.document_pairs(job.id).unwrap();
        assert!(Arc::ptr_eq(&pairs, &again));

        let details = manager.page_details(job.id, "b0_c0").unwrap();
        assert_eq!(details.len(), 1);
        let details_again = manager.page_details(job.id, "b0_c0").unwrap();
        assert!(Arc::ptr_eq(&details, &details_again));

        // a valid job with an unknown pair key yields an empty list
        let empty = manager.page_details(job.id, "b9_c9").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_derived_accessors_on_unknown_job_are_none() {
        let f = fixture(CompareConfig::default());
        let id = Uuid::new_v4();
        assert!(f.manager.document_pairs(id).is_none());
        assert!(f.manager.page_details(id, "b0_c0").is_none());
    }

    #[test]
    fn test_external_status_string() {
        let f = fixture(CompareConfig::default());
        let job = f.manager.create("base", "compare").unwrap();
        wait_terminal(&f.manager, job.id);
        assert_eq!(f.manager.external_status(job.id), Some("completed"));
    }
}

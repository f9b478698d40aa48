//! Storage seams and the filesystem artifact store
//!
//! The core depends on three narrow interfaces: a `DocumentStore` handing
//! out read-only document handles, a `JobStore` persisting job rows, and
//! an `ArtifactStore` keeping exactly one serialized result per job id.
//! In-memory implementations back tests and the CLI; the filesystem
//! artifact store is the production implementation.
//!
//! Artifact writes are atomic: serialize to a `.tmp` sibling, fsync,
//! rename. Readers see either the previous artifact or the new one, never
//! a torn file.

use crate::error::{CompareError, Result};
use crate::types::{ComparisonResult, Document, FontInfo, Job};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Time source, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of document handles
///
/// Pages are 1-based at this boundary and 0-based inside the core.
pub trait DocumentStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<Document>>;

    /// Raw text of a page (1-based)
    fn page_text(&self, document: &Document, page: usize) -> Result<String> {
        let index = external_page_index(document, page)?;
        Ok(document.pages[index].text.clone())
    }

    /// Pre-rendered bitmap path of a page (1-based)
    fn page_image_path(&self, document: &Document, page: usize) -> Result<PathBuf> {
        let index = external_page_index(document, page)?;
        document.pages[index]
            .rendered_path
            .clone()
            .ok_or_else(|| CompareError::RenderFailed {
                page,
                reason: "no pre-rendered bitmap".to_string(),
            })
    }

    /// Font table of a page (1-based)
    fn font_table(&self, document: &Document, page: usize) -> Result<Vec<FontInfo>> {
        let index = external_page_index(document, page)?;
        Ok(document.pages[index].fonts.clone())
    }
}

fn external_page_index(document: &Document, page: usize) -> Result<usize> {
    if page == 0 || page > document.page_count() {
        return Err(CompareError::InvalidPage {
            document_id: document.id.clone(),
            page,
            page_count: document.page_count(),
        });
    }
    Ok(page - 1)
}

/// In-memory document store for tests and the CLI
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Arc<Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document: Document) {
        self.documents
            .insert(document.id.clone(), Arc::new(document));
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, id: &str) -> Option<Arc<Document>> {
        self.documents.get(id).map(|d| Arc::clone(&d))
    }
}

/// Persistence for job rows
///
/// Every write is flushed before it returns, so a caller observing a row
/// sees its latest state.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<()>;
    fn update(&self, job: &Job) -> Result<()>;
    fn get(&self, id: Uuid) -> Option<Job>;
}

/// In-memory job store for tests and the CLI
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<Uuid, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn update(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.get(&id).map(|j| j.clone())
    }
}

/// One serialized result per job id
pub trait ArtifactStore: Send + Sync {
    /// Atomic replace; a second store for the same id wins completely
    fn store(&self, id: Uuid, result: &ComparisonResult) -> Result<()>;
    fn exists(&self, id: Uuid) -> bool;
    /// None when missing or unreadable
    fn retrieve(&self, id: Uuid) -> Option<ComparisonResult>;
    /// Idempotent
    fn delete(&self, id: Uuid) -> Result<()>;
}

/// Current artifact schema version
///
/// Bump when [`ComparisonResult`] changes shape; readers ignore artifacts
/// written under a different version.
pub const SCHEMA_VERSION: u32 = 1;

/// Self-describing artifact container
#[derive(Serialize, Deserialize)]
struct ArtifactEnvelope {
    schema_version: u32,
    result: ComparisonResult,
}

/// Filesystem artifact store: `<root>/comparisons/<id>/result.<ver>.bin`
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn comparison_dir(&self, id: Uuid) -> PathBuf {
        self.root.join("comparisons").join(id.to_string())
    }

    fn artifact_path(&self, id: Uuid) -> PathBuf {
        self.comparison_dir(id)
            .join(format!("result.{}.bin", SCHEMA_VERSION))
    }

    fn io_error(path: &Path, source: std::io::Error) -> CompareError {
        CompareError::StoreIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store(&self, id: Uuid, result: &ComparisonResult) -> Result<()> {
        let dir = self.comparison_dir(id);
        fs::create_dir_all(&dir).map_err(|e| Self::io_error(&dir, e))?;

        let envelope = ArtifactEnvelope {
            schema_version: SCHEMA_VERSION,
            result: result.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let final_path = self.artifact_path(id);
        let tmp_path = final_path.with_extension("bin.tmp");

        let mut file = fs::File::create(&tmp_path).map_err(|e| Self::io_error(&tmp_path, e))?;
        file.write_all(&bytes)
            .map_err(|e| Self::io_error(&tmp_path, e))?;
        file.sync_all().map_err(|e| Self::io_error(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &final_path).map_err(|e| Self::io_error(&final_path, e))?;
        Ok(())
    }

    fn exists(&self, id: Uuid) -> bool {
        fs::metadata(self.artifact_path(id))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    fn retrieve(&self, id: Uuid) -> Option<ComparisonResult> {
        let path = self.artifact_path(id);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<ArtifactEnvelope>(&bytes) {
            Ok(envelope) if envelope.schema_version == SCHEMA_VERSION => Some(envelope.result),
            Ok(envelope) => {
                warn!(
                    "artifact {} has schema version {}, expected {}",
                    id, envelope.schema_version, SCHEMA_VERSION
                );
                None
            }
            Err(e) => {
                warn!("artifact {} is unreadable: {}", id, e);
                None
            }
        }
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        let dir = self.comparison_dir(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComparisonSummary, PageContent};
    use std::collections::BTreeMap;

    fn sample_result(id: Uuid) -> ComparisonResult {
        ComparisonResult {
            id,
            base_document_id: "base".to_string(),
            compare_document_id: "compare".to_string(),
            page_pairs: Vec::new(),
            differences_by_page: BTreeMap::new(),
            document_pairs: Vec::new(),
            metadata_differences: BTreeMap::new(),
            summary: ComparisonSummary::default(),
            overall_similarity: 1.0,
            created_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    fn sample_document(id: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{}.pdf", id),
            pages: vec![PageContent::text_only("page one"), PageContent::text_only("page two")],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_store_and_retrieve_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let id = Uuid::new_v4();
        let result = sample_result(id);

        assert!(!store.exists(id));
        store.store(id, &result).unwrap();
        assert!(store.exists(id));

        let loaded = store.retrieve(id).unwrap();
        // serialized form must be identical for a deterministic result
        assert_eq!(
            serde_json::to_vec(&result).unwrap(),
            serde_json::to_vec(&loaded).unwrap()
        );
    }

    #[test]
    fn test_double_store_keeps_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let id = Uuid::new_v4();

        let first = sample_result(id);
        let mut second = sample_result(id);
        second.overall_similarity = 0.5;

        store.store(id, &first).unwrap();
        store.store(id, &second).unwrap();

        let loaded = store.retrieve(id).unwrap();
        assert_eq!(loaded.overall_similarity, 0.5);

        // exactly one artifact file, no leftover temp
        let comparison_dir = dir.path().join("comparisons").join(id.to_string());
        let entries: Vec<_> = fs::read_dir(comparison_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_retrieve_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.retrieve(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_retrieve_corrupt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let id = Uuid::new_v4();

        let path = store.artifact_path(id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not an artifact").unwrap();

        assert!(store.exists(id));
        assert!(store.retrieve(id).is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let id = Uuid::new_v4();

        store.store(id, &sample_result(id)).unwrap();
        store.delete(id).unwrap();
        assert!(!store.exists(id));
        store.delete(id).unwrap();
    }

    #[test]
    fn test_document_store_page_access_is_one_based() {
        let store = MemoryDocumentStore::new();
        store.insert(sample_document("doc-1"));
        let doc = store.get("doc-1").unwrap();

        assert_eq!(store.page_text(&doc, 1).unwrap(), "page one");
        assert_eq!(store.page_text(&doc, 2).unwrap(), "page two");
        assert!(matches!(
            store.page_text(&doc, 0),
            Err(CompareError::InvalidPage { .. })
        ));
        assert!(matches!(
            store.page_text(&doc, 3),
            Err(CompareError::InvalidPage { .. })
        ));
    }

    #[test]
    fn test_document_store_missing_id() {
        let store = MemoryDocumentStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_job_store_insert_then_update() {
        let store = MemoryJobStore::new();
        let id = Uuid::new_v4();
        let mut job = Job {
            id,
            base_document_id: "a".to_string(),
            compare_document_id: "b".to_string(),
            status: crate::types::JobStatus::Processing,
            progress: 0,
            total_ops: 0,
            completed_ops: 0,
            current_phase: "Initializing".to_string(),
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        store.insert(&job).unwrap();
        job.progress = 50;
        store.update(&job).unwrap();
        assert_eq!(store.get(id).unwrap().progress, 50);
    }
}

//! pdfcompare - page-addressable PDF comparison library
//!
//! Compares two pre-extracted PDF documents and produces a structured
//! report of their differences (text, fonts, images, styles, metadata).
//! The pipeline fingerprints pages, splits multi-document PDFs at detected
//! boundaries, pairs sub-documents and pages with threshold-staged greedy
//! matching, and runs typed difference detectors over every matched page
//! pair. The [`jobs::JobManager`] drives it all asynchronously with
//! progress, cancellation, timeouts and at-most-once artifact persistence.

pub mod boundaries;
pub mod cache;
pub mod compare_fonts;
pub mod compare_images;
pub mod compare_metadata;
pub mod compare_styles;
pub mod compare_text;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod jobs;
pub mod match_documents;
pub mod match_pages;
pub mod similarity;
pub mod store;
pub mod types;

pub use crate::config::CompareConfig;
pub use crate::engine::{ComparisonEngine, Phase, RunContext};
pub use crate::error::{CompareError, Result};
pub use crate::jobs::JobManager;
pub use crate::match_documents::PageRenderer;
pub use crate::store::{
    ArtifactStore, Clock, DocumentStore, FsArtifactStore, JobStore, MemoryDocumentStore,
    MemoryJobStore, SystemClock,
};
pub use crate::types::{
    ComparisonResult, Difference, DifferenceKind, Document, Job, JobStatus, PagePair,
};

/// Sink for progress and phase updates during a comparison run
///
/// Implementations must tolerate being called from worker threads; a
/// failed update must never propagate back into the engine.
pub trait ProgressSink: Send + Sync {
    fn update(&self, progress: u8, phase: Phase, completed_ops: u32, total_ops: u32);
}

/// A progress sink that discards everything
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn update(&self, _progress: u8, _phase: Phase, _completed_ops: u32, _total_ops: u32) {}
}

//! Error types for the comparison core
//!
//! Every fallible operation in the library surfaces one of these kinds.
//! Per-page render/extraction failures are recovered locally with a fallback
//! and never escape the engine; store and serialization failures abort the
//! owning job.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, CompareError>;

/// Typed failure raised by the comparison core
#[derive(Debug, Error)]
pub enum CompareError {
    /// The referenced document id is unknown to the document store
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// A page number outside the document's page range was requested
    #[error("invalid page {page} for document {document_id} ({page_count} pages)")]
    InvalidPage {
        document_id: String,
        page: usize,
        page_count: usize,
    },

    /// Rendering a page bitmap failed
    #[error("rendering failed for page {page}: {reason}")]
    RenderFailed { page: usize, reason: String },

    /// Extracting text or font data from a page failed
    #[error("extraction failed for page {page}: {reason}")]
    ExtractionFailed { page: usize, reason: String },

    /// The job exceeded its wall-clock budget
    #[error("Comparison timed out after {0} minutes")]
    Timeout(u64),

    /// The job was cancelled cooperatively
    #[error("comparison cancelled")]
    Cancelled,

    /// Reading or writing an artifact failed
    #[error("store I/O error at {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing or deserializing a result failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A bug or impossible state inside the core
    #[error("internal error: {0}")]
    Internal(String),
}

impl CompareError {
    /// True for the terminal-state errors that end a job as Failed rather
    /// than Cancelled.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompareError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompareError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_minutes() {
        let e = CompareError::Timeout(15);
        assert!(e.to_string().contains("timed out after 15 minutes"));
    }

    #[test]
    fn test_kind_predicates() {
        assert!(CompareError::Timeout(1).is_timeout());
        assert!(CompareError::Cancelled.is_cancelled());
        assert!(!CompareError::Cancelled.is_timeout());
    }
}

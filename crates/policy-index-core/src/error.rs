//! Error taxonomy for the retrieval pipeline.
//!
//! Embedding failures are recoverable per document (the document is stored
//! without a vector). Store failures are surfaced to the caller of the
//! failing operation; [`StoreError::is_fatal`] tells a batch loop whether
//! continuing makes sense at all.

use thiserror::Error;

use crate::index::IndexReport;

/// Why an embedding could not be produced for a text.
///
/// Every variant means "embedding unavailable for this document".
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("text too short to embed ({len} chars, minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding provider failed: {0}")]
    Provider(String),

    #[error("provider returned a {actual}-dimensional vector, expected {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding provider returned no vectors")]
    EmptyResponse,
}

/// Failure of a single store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity loss; every further operation would fail too.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("version conflict on {source_type}:{chunk_id}: expected version {expected}")]
    VersionConflict {
        source_type: String,
        chunk_id: String,
        expected: i64,
    },

    #[error("document not found: {source_type}:{chunk_id}")]
    NotFound {
        source_type: String,
        chunk_id: String,
    },

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when the error affects the store as a whole rather than one row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A batch indexing run that had to stop early.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The store became unreachable. `report` holds the progress made
    /// before the failure; those rows are durably stored.
    #[error("indexing aborted after {} of {} records: {source}", .report.upserted, .report.total)]
    Aborted {
        report: IndexReport,
        #[source]
        source: StoreError,
    },
}

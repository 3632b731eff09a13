//! Storage abstraction for policy-index.
//!
//! The [`Store`] trait defines every operation the retrieval pipeline needs
//! from a document store, enabling pluggable backends (SQLite in the app
//! crate, [`memory::InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must make each upsert atomic per row: the insert-or-update decision and
//! the write happen together.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{Document, StoredDocument};

/// Result of a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Row id of the (new or existing) document.
    pub id: i64,
    /// Version after the write; `1` for a fresh insert.
    pub version: i64,
    /// `true` if no row existed for the natural key.
    pub inserted: bool,
}

/// A document with an embedding, scored against a query vector.
///
/// Carries just enough to rank and filter without loading document bodies.
#[derive(Debug, Clone)]
pub struct VectorCandidate {
    pub id: i64,
    pub source_type: String,
    /// Raw cosine similarity in `[-1.0, 1.0]`.
    pub similarity: f64,
}

/// Per-source-type document counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source_type: String,
    pub total: i64,
    pub with_embedding: i64,
}

/// Abstract document store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or replace by natural key |
/// | [`upsert_document_checked`](Store::upsert_document_checked) | Replace only if the version matches |
/// | [`get_document`](Store::get_document) | Fetch one document by natural key |
/// | [`get_documents`](Store::get_documents) | Fetch documents by row id |
/// | [`vector_candidates`](Store::vector_candidates) | Score every embedded document against a query |
/// | [`keyword_lookup`](Store::keyword_lookup) | Substring lookup, embedded or not |
/// | [`document_stats`](Store::document_stats) | Counts per source type |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a document, or overwrite the row with the same
    /// `(source_type, chunk_id)`. Preserves `id` and `created_at` on
    /// overwrite and bumps `version`.
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome, StoreError>;

    /// Overwrite an existing document only if its stored version equals
    /// `expected_version`.
    ///
    /// Fails with [`StoreError::VersionConflict`] on a stale version and
    /// [`StoreError::NotFound`] if the key does not exist.
    async fn upsert_document_checked(
        &self,
        doc: &Document,
        expected_version: i64,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn get_document(
        &self,
        source_type: &str,
        chunk_id: &str,
    ) -> Result<Option<StoredDocument>, StoreError>;

    /// Fetch documents by row id. Missing ids are skipped; order follows
    /// `ids`.
    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<StoredDocument>, StoreError>;

    /// Compute the cosine similarity of `query_vec` against every document
    /// that has a comparable embedding: same length as the query, non-zero
    /// norm. Other documents are never returned, and a zero query matches
    /// nothing. No ordering is guaranteed.
    async fn vector_candidates(&self, query_vec: &[f32])
        -> Result<Vec<VectorCandidate>, StoreError>;

    /// Case-insensitive substring match over title and content, ordered by
    /// row id. Includes documents without embeddings.
    async fn keyword_lookup(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    /// Document counts grouped by source type, sorted by source type.
    async fn document_stats(&self) -> Result<Vec<SourceStats>, StoreError>;
}

/// Validate a document's embedding before it is written.
///
/// Rejects empty or non-finite vectors, and vectors whose length differs
/// from `expected_dims` when the store is pinned to a dimensionality.
pub fn validate_embedding(doc: &Document, expected_dims: Option<usize>) -> Result<(), StoreError> {
    let Some(vec) = doc.embedding.as_deref() else {
        return Ok(());
    };
    if vec.is_empty() {
        return Err(StoreError::Constraint(format!(
            "{}: embedding is empty",
            doc.key()
        )));
    }
    if vec.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::Constraint(format!(
            "{}: embedding contains non-finite values",
            doc.key()
        )));
    }
    if let Some(expected) = expected_dims {
        if vec.len() != expected {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: vec.len(),
            });
        }
    }
    Ok(())
}

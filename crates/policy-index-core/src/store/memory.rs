//! In-memory [`Store`] implementation for testing and embedding in other
//! programs.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`; vector search is a
//! brute-force cosine scan over rows that carry an embedding.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{content_hash, Document, StoredDocument};

use super::{validate_embedding, SourceStats, Store, UpsertOutcome, VectorCandidate};

#[derive(Default)]
struct Rows {
    docs: Vec<StoredDocument>,
    next_id: i64,
}

/// In-memory document store.
#[derive(Default)]
pub struct InMemoryStore {
    rows: RwLock<Rows>,
    dims: Option<usize>,
    model: Option<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the store to a vector dimensionality; upserts with a different
    /// length fail with [`StoreError::DimensionMismatch`].
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = Some(dims);
        self
    }

    /// Record `model` as the producer of every stored embedding.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    /// Number of stored rows.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.docs.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Rows>, StoreError> {
        self.rows
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Rows>, StoreError> {
        self.rows
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn overwrite(&self, existing: &mut StoredDocument, doc: &Document, now: i64) -> UpsertOutcome {
        existing.document = doc.clone();
        existing.content_hash = content_hash(&doc.content);
        existing.embedding_model = doc.embedding.as_ref().and(self.model.clone());
        existing.version += 1;
        existing.updated_at = now;
        UpsertOutcome {
            id: existing.id,
            version: existing.version,
            inserted: false,
        }
    }
}

fn same_key(stored: &StoredDocument, source_type: &str, chunk_id: &str) -> bool {
    stored.document.source_type == source_type && stored.document.chunk_id == chunk_id
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome, StoreError> {
        validate_embedding(doc, self.dims)?;
        let now = chrono::Utc::now().timestamp();
        let mut rows = self.write()?;

        if let Some(existing) = rows
            .docs
            .iter_mut()
            .find(|d| same_key(d, &doc.source_type, &doc.chunk_id))
        {
            return Ok(self.overwrite(existing, doc, now));
        }

        rows.next_id += 1;
        let id = rows.next_id;
        rows.docs.push(StoredDocument {
            id,
            document: doc.clone(),
            content_hash: content_hash(&doc.content),
            embedding_model: doc.embedding.as_ref().and(self.model.clone()),
            version: 1,
            created_at: now,
            updated_at: now,
        });
        Ok(UpsertOutcome {
            id,
            version: 1,
            inserted: true,
        })
    }

    async fn upsert_document_checked(
        &self,
        doc: &Document,
        expected_version: i64,
    ) -> Result<UpsertOutcome, StoreError> {
        validate_embedding(doc, self.dims)?;
        let now = chrono::Utc::now().timestamp();
        let mut rows = self.write()?;

        let existing = rows
            .docs
            .iter_mut()
            .find(|d| same_key(d, &doc.source_type, &doc.chunk_id))
            .ok_or_else(|| StoreError::NotFound {
                source_type: doc.source_type.clone(),
                chunk_id: doc.chunk_id.clone(),
            })?;

        if existing.version != expected_version {
            return Err(StoreError::VersionConflict {
                source_type: doc.source_type.clone(),
                chunk_id: doc.chunk_id.clone(),
                expected: expected_version,
            });
        }
        Ok(self.overwrite(existing, doc, now))
    }

    async fn get_document(
        &self,
        source_type: &str,
        chunk_id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let rows = self.read()?;
        Ok(rows
            .docs
            .iter()
            .find(|d| same_key(d, source_type, chunk_id))
            .cloned())
    }

    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<StoredDocument>, StoreError> {
        let rows = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| rows.docs.iter().find(|d| d.id == *id).cloned())
            .collect())
    }

    async fn vector_candidates(
        &self,
        query_vec: &[f32],
    ) -> Result<Vec<VectorCandidate>, StoreError> {
        let rows = self.read()?;
        Ok(rows
            .docs
            .iter()
            .filter_map(|d| {
                let v = d.document.embedding.as_deref()?;
                let similarity = cosine_similarity(query_vec, v)?;
                Some(VectorCandidate {
                    id: d.id,
                    source_type: d.document.source_type.clone(),
                    similarity: similarity as f64,
                })
            })
            .collect())
    }

    async fn keyword_lookup(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.read()?;
        Ok(rows
            .docs
            .iter()
            .filter(|d| {
                d.document.title.to_lowercase().contains(&needle)
                    || d.document.content.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn document_stats(&self) -> Result<Vec<SourceStats>, StoreError> {
        let rows = self.read()?;
        let mut groups: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
        for d in &rows.docs {
            let entry = groups.entry(d.document.source_type.as_str()).or_default();
            entry.0 += 1;
            if d.document.embedding.is_some() {
                entry.1 += 1;
            }
        }
        Ok(groups
            .into_iter()
            .map(|(source_type, (total, with_embedding))| SourceStats {
                source_type: source_type.to_string(),
                total,
                with_embedding,
            })
            .collect())
    }
}

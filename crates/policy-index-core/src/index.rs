//! Generic batch indexing.
//!
//! One routine for every dataset: for each [`IndexRecord`], in order,
//! embed the content, then upsert the resulting [`Document`]. Embedding
//! failures never stop the batch (the document is stored without a vector);
//! per-record store failures are collected; a store that becomes
//! unreachable aborts the run with the partial [`IndexReport`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::embedding::{embed_text, EmbeddingProvider, DEFAULT_MIN_CHARS};
use crate::error::IndexError;
use crate::models::{content_hash, Citation, Document, DocumentKey};
use crate::store::Store;

/// One logical unit of content to index.
///
/// Deserializes from the dataset file format; build programmatically with
/// [`IndexRecord::new`] and the chained setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// May be omitted in dataset files when the dataset sets a default.
    #[serde(default)]
    pub source_type: String,
    pub chunk_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub citation: Citation,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_date: Option<NaiveDate>,
}

impl IndexRecord {
    pub fn new(source_type: &str, chunk_id: &str, title: &str, content: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            chunk_id: chunk_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            citation: Citation::default(),
            source_url: None,
            source_date: None,
        }
    }

    pub fn citation(mut self, citation: Citation) -> Self {
        self.citation = citation;
        self
    }

    pub fn source_url(mut self, url: &str) -> Self {
        self.source_url = Some(url.to_string());
        self
    }

    pub fn source_date(mut self, date: NaiveDate) -> Self {
        self.source_date = Some(date);
        self
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.source_type, &self.chunk_id)
    }

    fn into_document(self, embedding: Option<Vec<f32>>) -> Document {
        Document {
            source_type: self.source_type,
            chunk_id: self.chunk_id,
            source_url: self.source_url,
            source_date: self.source_date,
            title: self.title,
            content: self.content,
            citation: self.citation,
            embedding,
        }
    }
}

/// Knobs for an indexing run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Minimum trimmed content length worth embedding.
    pub min_chars: usize,
    /// Keep a stored embedding when the content hash and model are
    /// unchanged, instead of calling the provider again.
    pub reuse_embeddings: bool,
    /// Count what would happen without embedding or writing anything.
    pub dry_run: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            min_chars: DEFAULT_MIN_CHARS,
            reuse_embeddings: true,
            dry_run: false,
        }
    }
}

/// A record whose upsert failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub key: DocumentKey,
    pub error: String,
}

/// Outcome counts of an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub total: u64,
    pub upserted: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Documents stored with an embedding (fresh or reused).
    pub embedded: u64,
    /// Subset of `embedded` whose vector was reused from the store.
    pub reused: u64,
    /// Documents stored without an embedding.
    pub embeddings_skipped: u64,
    pub failed: Vec<FailedRecord>,
}

impl IndexReport {
    pub fn succeeded(&self) -> u64 {
        self.upserted
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }
}

/// Receives progress updates as records are processed.
pub trait IndexProgress: Send + Sync {
    fn report(&self, done: u64, total: u64);
}

/// Progress sink that discards updates.
pub struct NoProgress;

impl IndexProgress for NoProgress {
    fn report(&self, _done: u64, _total: u64) {}
}

/// Index `records` into `store`, embedding each with `provider`.
///
/// Records are processed sequentially in the given order.
pub async fn index_records<S: Store + ?Sized>(
    store: &S,
    provider: &dyn EmbeddingProvider,
    records: Vec<IndexRecord>,
    options: &IndexOptions,
    progress: &dyn IndexProgress,
) -> Result<IndexReport, IndexError> {
    let mut report = IndexReport {
        total: records.len() as u64,
        ..Default::default()
    };

    if options.dry_run {
        return Ok(report);
    }

    for (i, record) in records.into_iter().enumerate() {
        let key = record.key();

        let (embedding, reused) = match reusable_embedding(store, &record, provider, options).await
        {
            Some(v) => (Some(v), true),
            None => match embed_text(provider, &record.content, options.min_chars).await {
                Ok(v) => (Some(v), false),
                Err(e) => {
                    tracing::warn!(document = %key, error = %e, "embedding unavailable, storing without vector");
                    (None, false)
                }
            },
        };
        let has_embedding = embedding.is_some();

        match store.upsert_document(&record.into_document(embedding)).await {
            Ok(outcome) => {
                report.upserted += 1;
                if outcome.inserted {
                    report.inserted += 1;
                } else {
                    report.updated += 1;
                }
                if has_embedding {
                    report.embedded += 1;
                    if reused {
                        report.reused += 1;
                    }
                } else {
                    report.embeddings_skipped += 1;
                }
                tracing::debug!(document = %key, id = outcome.id, version = outcome.version, "upserted");
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(document = %key, error = %e, "store unavailable, aborting run");
                return Err(IndexError::Aborted { report, source: e });
            }
            Err(e) => {
                tracing::warn!(document = %key, error = %e, "upsert failed");
                report.failed.push(FailedRecord {
                    key,
                    error: e.to_string(),
                });
            }
        }

        progress.report(i as u64 + 1, report.total);
    }

    tracing::info!(
        total = report.total,
        upserted = report.upserted,
        embedded = report.embedded,
        skipped = report.embeddings_skipped,
        failed = report.failed.len(),
        "indexing run complete"
    );

    Ok(report)
}

/// Return the stored vector if the row's content and model are unchanged.
async fn reusable_embedding<S: Store + ?Sized>(
    store: &S,
    record: &IndexRecord,
    provider: &dyn EmbeddingProvider,
    options: &IndexOptions,
) -> Option<Vec<f32>> {
    if !options.reuse_embeddings {
        return None;
    }
    let existing = match store
        .get_document(&record.source_type, &record.chunk_id)
        .await
    {
        Ok(found) => found?,
        Err(e) => {
            tracing::debug!(document = %record.key(), error = %e, "lookup for embedding reuse failed");
            return None;
        }
    };
    let same_content = existing.content_hash == content_hash(&record.content);
    let same_model = existing.embedding_model.as_deref() == Some(provider.model_name());
    if same_content && same_model {
        existing.document.embedding
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, StoreError};
    use crate::models::StoredDocument;
    use crate::store::memory::InMemoryStore;
    use crate::store::{SourceStats, UpsertOutcome, VectorCandidate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds by text length; fails for any text containing "FAIL".
    struct LengthProvider {
        calls: AtomicUsize,
    }

    impl LengthProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts
                .iter()
                .map(|t| {
                    if t.contains("FAIL") {
                        Err(EmbeddingError::Provider("quota exceeded".into()))
                    } else {
                        Ok(vec![t.len() as f32, 1.0])
                    }
                })
                .collect()
        }
    }

    fn records() -> Vec<IndexRecord> {
        vec![
            IndexRecord::new("manifesto", "a", "Housing", "Affordable housing policy"),
            IndexRecord::new("manifesto", "b", "Short", "tiny"),
            IndexRecord::new("manifesto", "c", "Broken", "This one will FAIL to embed"),
            IndexRecord::new("commentary", "d", "Talk", "Housing is a hot topic"),
        ]
    }

    #[tokio::test]
    async fn one_failed_embedding_does_not_stop_the_batch() {
        let store = InMemoryStore::new().with_model("length");
        let provider = LengthProvider::new();
        let report = index_records(
            &store,
            &provider,
            records(),
            &IndexOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.upserted, 4);
        assert_eq!(report.embedded, 2);
        assert_eq!(report.embeddings_skipped, 2);
        assert!(report.failed.is_empty());
        assert_eq!(store.len().unwrap(), 4);

        let broken = store.get_document("manifesto", "c").await.unwrap().unwrap();
        assert!(broken.document.embedding.is_none());
    }

    #[tokio::test]
    async fn reindexing_is_idempotent_and_reuses_vectors() {
        let store = InMemoryStore::new().with_model("length");
        let provider = LengthProvider::new();
        let opts = IndexOptions::default();

        index_records(&store, &provider, records(), &opts, &NoProgress)
            .await
            .unwrap();
        let calls_after_first = provider.calls.load(Ordering::SeqCst);

        let second = index_records(&store, &provider, records(), &opts, &NoProgress)
            .await
            .unwrap();

        assert_eq!(store.len().unwrap(), 4);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 4);
        assert_eq!(second.reused, 2);
        // Only the record that failed last time is retried against the provider.
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_first + 1);
    }

    #[tokio::test]
    async fn changed_content_is_re_embedded() {
        let store = InMemoryStore::new().with_model("length");
        let provider = LengthProvider::new();
        let opts = IndexOptions::default();

        let first = vec![IndexRecord::new("manifesto", "x", "T", "Affordable housing policy")];
        index_records(&store, &provider, first, &opts, &NoProgress)
            .await
            .unwrap();

        let second = vec![IndexRecord::new("manifesto", "x", "T", "Public transport for all")];
        let report = index_records(&store, &provider, second, &opts, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.reused, 0);

        let stored = store.get_document("manifesto", "x").await.unwrap().unwrap();
        assert_eq!(stored.document.content, "Public transport for all");
        assert_eq!(
            stored.document.embedding,
            Some(vec!["Public transport for all".len() as f32, 1.0])
        );
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = InMemoryStore::new();
        let provider = LengthProvider::new();
        let opts = IndexOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = index_records(&store, &provider, records(), &opts, &NoProgress)
            .await
            .unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.upserted, 0);
        assert!(store.is_empty().unwrap());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn per_record_store_failures_are_collected() {
        let store = InMemoryStore::new().with_dims(3);
        let provider = LengthProvider::new();
        let report = index_records(
            &store,
            &provider,
            records(),
            &IndexOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap();

        // Embedded records carry 2-dim vectors and are rejected; the rest land.
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.upserted, 2);
        assert_eq!(report.failed[0].key.to_string(), "manifesto:a");
    }

    /// A store whose connection drops after `ok_writes` upserts.
    struct FlakyStore {
        inner: InMemoryStore,
        ok_writes: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome, StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.ok_writes {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.upsert_document(doc).await
        }
        async fn upsert_document_checked(
            &self,
            doc: &Document,
            expected_version: i64,
        ) -> Result<UpsertOutcome, StoreError> {
            self.inner.upsert_document_checked(doc, expected_version).await
        }
        async fn get_document(
            &self,
            source_type: &str,
            chunk_id: &str,
        ) -> Result<Option<StoredDocument>, StoreError> {
            self.inner.get_document(source_type, chunk_id).await
        }
        async fn get_documents(&self, ids: &[i64]) -> Result<Vec<StoredDocument>, StoreError> {
            self.inner.get_documents(ids).await
        }
        async fn vector_candidates(
            &self,
            query_vec: &[f32],
        ) -> Result<Vec<VectorCandidate>, StoreError> {
            self.inner.vector_candidates(query_vec).await
        }
        async fn keyword_lookup(
            &self,
            term: &str,
            limit: usize,
        ) -> Result<Vec<StoredDocument>, StoreError> {
            self.inner.keyword_lookup(term, limit).await
        }
        async fn document_stats(&self) -> Result<Vec<SourceStats>, StoreError> {
            self.inner.document_stats().await
        }
    }

    #[tokio::test]
    async fn unavailable_store_aborts_with_partial_report() {
        let store = FlakyStore {
            inner: InMemoryStore::new(),
            ok_writes: 2,
            writes: AtomicUsize::new(0),
        };
        let provider = LengthProvider::new();
        let err = index_records(
            &store,
            &provider,
            records(),
            &IndexOptions::default(),
            &NoProgress,
        )
        .await
        .unwrap_err();

        let IndexError::Aborted { report, source } = err;
        assert_eq!(report.upserted, 2);
        assert!(source.is_fatal());
        assert_eq!(store.inner.len().unwrap(), 2);
    }
}

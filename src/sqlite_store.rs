//! SQLite-backed [`Store`] implementation.
//!
//! Every upsert is a single `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`
//! statement, so the insert-or-update decision and the write are atomic per
//! row. Similarity search is a brute-force cosine scan over rows with a
//! non-null embedding.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use policy_index_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use policy_index_core::models::{content_hash, Citation, Document, StoredDocument};
use policy_index_core::store::{
    validate_embedding, SourceStats, Store, UpsertOutcome, VectorCandidate,
};
use policy_index_core::StoreError;

const SELECT_COLUMNS: &str = "id, source_type, chunk_id, source_url, source_date, title, content, \
     content_hash, citation_json, embedding, embedding_model, version, created_at, updated_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    dims: Option<usize>,
    model: Option<String>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dims: None,
            model: None,
        }
    }

    /// Reject embeddings whose length differs from `dims`.
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = Some(dims);
        self
    }

    /// Record `model` as the producer of embeddings written by this store.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Total number of rows.
    pub async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }
}

/// Classify a sqlx error into the store error taxonomy.
pub fn store_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        sqlx::Error::Database(db)
            if db.is_unique_violation()
                || db.is_check_violation()
                || db.is_foreign_key_violation() =>
        {
            StoreError::Constraint(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredDocument, StoreError> {
    let source_date: Option<String> = row.try_get("source_date").map_err(store_err)?;
    let source_date = match source_date {
        Some(s) => Some(
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| StoreError::Backend(format!("bad source_date '{}': {}", s, e)))?,
        ),
        None => None,
    };

    let citation_json: String = row.try_get("citation_json").map_err(store_err)?;
    let citation: serde_json::Value = serde_json::from_str(&citation_json)
        .map_err(|e| StoreError::Backend(format!("bad citation_json: {}", e)))?;

    let embedding: Option<Vec<u8>> = row.try_get("embedding").map_err(store_err)?;

    Ok(StoredDocument {
        id: row.try_get("id").map_err(store_err)?,
        document: Document {
            source_type: row.try_get("source_type").map_err(store_err)?,
            chunk_id: row.try_get("chunk_id").map_err(store_err)?,
            source_url: row.try_get("source_url").map_err(store_err)?,
            source_date,
            title: row.try_get("title").map_err(store_err)?,
            content: row.try_get("content").map_err(store_err)?,
            citation: Citation::from(citation),
            embedding: embedding.map(|b| blob_to_vec(&b)),
        },
        content_hash: row.try_get("content_hash").map_err(store_err)?,
        embedding_model: row.try_get("embedding_model").map_err(store_err)?,
        version: row.try_get("version").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        updated_at: row.try_get("updated_at").map_err(store_err)?,
    })
}

/// Column values shared by both upsert paths.
struct WriteValues {
    source_date: Option<String>,
    content_hash: String,
    citation_json: String,
    embedding: Option<Vec<u8>>,
    embedding_dims: Option<i64>,
    embedding_model: Option<String>,
}

impl SqliteStore {
    fn write_values(&self, doc: &Document) -> Result<WriteValues, StoreError> {
        validate_embedding(doc, self.dims)?;
        let citation_json = serde_json::to_string(&doc.citation)
            .map_err(|e| StoreError::Backend(format!("citation not serializable: {}", e)))?;
        Ok(WriteValues {
            source_date: format_date(doc.source_date),
            content_hash: content_hash(&doc.content),
            citation_json,
            embedding: doc.embedding.as_deref().map(vec_to_blob),
            embedding_dims: doc.embedding.as_ref().map(|v| v.len() as i64),
            embedding_model: doc.embedding.as_ref().and(self.model.clone()),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<UpsertOutcome, StoreError> {
        let v = self.write_values(doc)?;
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            INSERT INTO documents (source_type, chunk_id, source_url, source_date, title,
                                   content, content_hash, citation_json, embedding,
                                   embedding_dims, embedding_model, version,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(source_type, chunk_id) DO UPDATE SET
                source_url = excluded.source_url,
                source_date = excluded.source_date,
                title = excluded.title,
                content = excluded.content,
                content_hash = excluded.content_hash,
                citation_json = excluded.citation_json,
                embedding = excluded.embedding,
                embedding_dims = excluded.embedding_dims,
                embedding_model = excluded.embedding_model,
                version = documents.version + 1,
                updated_at = excluded.updated_at
            RETURNING id, version
            "#,
        )
        .bind(&doc.source_type)
        .bind(&doc.chunk_id)
        .bind(&doc.source_url)
        .bind(&v.source_date)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&v.content_hash)
        .bind(&v.citation_json)
        .bind(&v.embedding)
        .bind(v.embedding_dims)
        .bind(&v.embedding_model)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let version: i64 = row.try_get("version").map_err(store_err)?;
        Ok(UpsertOutcome {
            id: row.try_get("id").map_err(store_err)?,
            version,
            inserted: version == 1,
        })
    }

    async fn upsert_document_checked(
        &self,
        doc: &Document,
        expected_version: i64,
    ) -> Result<UpsertOutcome, StoreError> {
        let v = self.write_values(doc)?;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query(
            r#"
            UPDATE documents SET
                source_url = ?,
                source_date = ?,
                title = ?,
                content = ?,
                content_hash = ?,
                citation_json = ?,
                embedding = ?,
                embedding_dims = ?,
                embedding_model = ?,
                version = version + 1,
                updated_at = ?
            WHERE source_type = ? AND chunk_id = ? AND version = ?
            RETURNING id, version
            "#,
        )
        .bind(&doc.source_url)
        .bind(&v.source_date)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&v.content_hash)
        .bind(&v.citation_json)
        .bind(&v.embedding)
        .bind(v.embedding_dims)
        .bind(&v.embedding_model)
        .bind(now)
        .bind(&doc.source_type)
        .bind(&doc.chunk_id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE source_type = ? AND chunk_id = ?",
            )
            .bind(&doc.source_type)
            .bind(&doc.chunk_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_err)?;
            tx.rollback().await.map_err(store_err)?;

            return Err(match exists {
                Some(_) => StoreError::VersionConflict {
                    source_type: doc.source_type.clone(),
                    chunk_id: doc.chunk_id.clone(),
                    expected: expected_version,
                },
                None => StoreError::NotFound {
                    source_type: doc.source_type.clone(),
                    chunk_id: doc.chunk_id.clone(),
                },
            });
        };

        let outcome = UpsertOutcome {
            id: row.try_get("id").map_err(store_err)?,
            version: row.try_get("version").map_err(store_err)?,
            inserted: false,
        };
        tx.commit().await.map_err(store_err)?;
        Ok(outcome)
    }

    async fn get_document(
        &self,
        source_type: &str,
        chunk_id: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let sql = format!(
            "SELECT {} FROM documents WHERE source_type = ? AND chunk_id = ?",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(source_type)
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_stored).transpose()
    }

    async fn get_documents(&self, ids: &[i64]) -> Result<Vec<StoredDocument>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM documents WHERE id IN (", SELECT_COLUMNS));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        qb.push(")");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let docs = rows
            .iter()
            .map(row_to_stored)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ids
            .iter()
            .filter_map(|id| docs.iter().find(|d| d.id == *id).cloned())
            .collect())
    }

    async fn vector_candidates(
        &self,
        query_vec: &[f32],
    ) -> Result<Vec<VectorCandidate>, StoreError> {
        if query_vec.is_empty() {
            return Ok(Vec::new());
        }

        // Rows written under another model's dimensionality are not comparable.
        let rows = sqlx::query(
            r#"
            SELECT id, source_type, embedding
            FROM documents
            WHERE embedding IS NOT NULL AND embedding_dims = ?
            "#,
        )
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(store_err)?;
            let Some(similarity) = cosine_similarity(query_vec, &blob_to_vec(&blob)) else {
                continue;
            };
            candidates.push(VectorCandidate {
                id: row.try_get("id").map_err(store_err)?,
                source_type: row.try_get("source_type").map_err(store_err)?,
                similarity: similarity as f64,
            });
        }
        Ok(candidates)
    }

    async fn keyword_lookup(
        &self,
        term: &str,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // SQLite's lower() only folds ASCII, so matching happens here.
        let rows = sqlx::query("SELECT id, title, content FROM documents ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let mut ids = Vec::new();
        for row in &rows {
            let title: String = row.try_get("title").map_err(store_err)?;
            let content: String = row.try_get("content").map_err(store_err)?;
            if title.to_lowercase().contains(&needle) || content.to_lowercase().contains(&needle) {
                ids.push(row.try_get::<i64, _>("id").map_err(store_err)?);
                if ids.len() == limit {
                    break;
                }
            }
        }

        self.get_documents(&ids).await
    }

    async fn document_stats(&self) -> Result<Vec<SourceStats>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source_type,
                   COUNT(*) AS total,
                   COUNT(embedding) AS with_embedding
            FROM documents
            GROUP BY source_type
            ORDER BY source_type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                Ok(SourceStats {
                    source_type: row.try_get("source_type").map_err(store_err)?,
                    total: row.try_get("total").map_err(store_err)?,
                    with_embedding: row.try_get("with_embedding").map_err(store_err)?,
                })
            })
            .collect()
    }
}

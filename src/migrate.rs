//! Database schema migrations (idempotent).
//!
//! One `documents` table holds every indexed document. The
//! `UNIQUE(source_type, chunk_id)` constraint is what makes upserts
//! idempotent; `embedding` is a nullable little-endian `f32` BLOB.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema on the configured database.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an existing pool. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_type TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            source_url TEXT,
            source_date TEXT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            citation_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            embedding_dims INTEGER,
            embedding_model TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(source_type, chunk_id),
            CHECK ((embedding IS NULL) = (embedding_dims IS NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_type ON documents(source_type)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_has_embedding ON documents(id) WHERE embedding IS NOT NULL",
    )
    .execute(pool)
    .await?;

    tracing::debug!("schema up to date");
    Ok(())
}

//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database with WAL mode
//! enabled, so a search can run while an indexing job writes. The database
//! file and its parent directories are created if they don't exist.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use policy_index_core::embedding::EmbeddingProvider;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

/// Create a connection pool to the configured SQLite database.
///
/// # Errors
///
/// Returns an error if the database cannot be created or connected to.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    tracing::debug!(path = %db_path.display(), "database connected");
    Ok(pool)
}

/// Connect, ensure the schema exists, and wrap the pool in a [`SqliteStore`]
/// pinned to `provider`'s model and dimensionality.
pub async fn open_store(config: &Config, provider: &dyn EmbeddingProvider) -> Result<SqliteStore> {
    let pool = connect(config).await?;
    crate::migrate::apply(&pool).await?;

    let mut store = SqliteStore::new(pool);
    if provider.dims() > 0 {
        store = store
            .with_dims(provider.dims())
            .with_model(provider.model_name());
    }
    Ok(store)
}

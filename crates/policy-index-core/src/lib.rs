//! # policy-index core
//!
//! Shared retrieval logic for policy-index: document models, the error
//! taxonomy, the [`store::Store`] abstraction with an in-memory backend,
//! similarity search with policy-source boosting, the embedding provider
//! trait, and the generic batch indexer.
//!
//! This crate contains no sqlx, HTTP client, or filesystem I/O. Concrete
//! providers and the SQLite backend live in the `policy-index` app crate.

pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod search;
pub mod store;

pub use error::{EmbeddingError, IndexError, StoreError};
pub use models::{Citation, Document, DocumentKey, StoredDocument};

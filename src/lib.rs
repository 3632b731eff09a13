//! # policy-index
//!
//! Indexes curated political content (manifestos, party positions, website
//! pages, curated answers) into a SQLite vector store and serves
//! similarity search with a ranking boost for authoritative policy sources.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Datasets   │──▶│ Batch indexer │──▶│ SqliteStore  │
//! │ JSON/JSONL  │   │ embed+upsert │   │ documents    │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                                             ▼
//!                           search / stats / get / lookup / check
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! policy-index init
//! policy-index index all
//! policy-index search "housing policy"
//! policy-index stats
//! ```
//!
//! Retrieval logic that needs no I/O (models, ranking, the indexer, the
//! in-memory store) lives in the `policy-index-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`embedding`] | Concrete embedding providers |
//! | [`dataset`] | Record sources |
//! | [`ingest`] | `index` commands |
//! | [`search`] | Similarity search command |
//! | [`checks`] | Retrieval checks |

pub mod checks;
pub mod config;
pub mod dataset;
pub mod db;
pub mod embedding;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;
pub mod stats;

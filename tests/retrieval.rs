//! Library-level tests against a real SQLite file.

use async_trait::async_trait;
use proptest::prelude::*;
use tempfile::TempDir;

use policy_index::config::Config;
use policy_index::dataset::FileDataset;
use policy_index::db;
use policy_index::embedding::DisabledProvider;
use policy_index::ingest::{index_dataset, index_options};
use policy_index::sqlite_store::SqliteStore;
use policy_index_core::embedding::EmbeddingProvider;
use policy_index_core::index::NoProgress;
use policy_index_core::search::{search_similar, BoostPolicy, SearchOptions};
use policy_index_core::store::Store;
use policy_index_core::{Citation, Document, EmbeddingError};

/// Embeds text as a 3-dim bag of three topic words.
struct TopicProvider;

#[async_trait]
impl EmbeddingProvider for TopicProvider {
    fn model_name(&self) -> &str {
        "topic-v1"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let count = |w: &str| t.matches(w).count() as f32;
                let v = vec![count("housing"), count("transport"), count("tax")];
                if v.iter().all(|x| *x == 0.0) {
                    vec![0.0, 0.0, 1.0]
                } else {
                    v
                }
            })
            .collect())
    }
}

async fn open(tmp: &TempDir) -> (Config, SqliteStore) {
    let config = Config::from_toml(&format!(
        "[db]\npath = \"{}/policy.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let store = db::open_store(&config, &TopicProvider).await.unwrap();
    (config, store)
}

fn doc(source_type: &str, chunk_id: &str, embedding: Option<Vec<f32>>) -> Document {
    Document {
        source_type: source_type.into(),
        chunk_id: chunk_id.into(),
        source_url: None,
        source_date: None,
        title: chunk_id.into(),
        content: format!("content for {}", chunk_id),
        citation: Citation::default(),
        embedding,
    }
}

fn options(limit: usize, threshold: f64, boost: bool) -> SearchOptions {
    SearchOptions {
        limit,
        threshold,
        boost_policy_sources: boost,
        source_types: Vec::new(),
    }
}

#[tokio::test]
async fn policy_source_ranks_first() {
    let tmp = TempDir::new().unwrap();
    let (_, store) = open(&tmp).await;
    store
        .upsert_document(&doc("manifesto", "doc-1", Some(vec![1.0, 0.0, 0.0])))
        .await
        .unwrap();
    store
        .upsert_document(&doc("commentary", "doc-2", Some(vec![0.9, 0.1, 0.0])))
        .await
        .unwrap();

    let results = search_similar(
        &store,
        &[1.0, 0.0, 0.0],
        &options(2, 0.5, true),
        &BoostPolicy::default(),
    )
    .await
    .unwrap();
    let ids: Vec<&str> = results
        .iter()
        .map(|r| r.document.document.chunk_id.as_str())
        .collect();
    assert_eq!(ids, vec!["doc-1", "doc-2"]);
    assert!(results[0].boosted);
    assert!((results[0].similarity - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn boost_never_admits_below_threshold() {
    let tmp = TempDir::new().unwrap();
    let (_, store) = open(&tmp).await;
    // cos = 0.48 against [1, 0, 0]; +0.05 would clear 0.5 if boost admitted.
    let v = vec![0.48, (1.0f32 - 0.48 * 0.48).sqrt(), 0.0];
    store
        .upsert_document(&doc("manifesto", "near", Some(v)))
        .await
        .unwrap();

    let results = search_similar(
        &store,
        &[1.0, 0.0, 0.0],
        &options(5, 0.5, true),
        &BoostPolicy::default(),
    )
    .await
    .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn upserting_same_key_twice_keeps_one_row() {
    let tmp = TempDir::new().unwrap();
    let (_, store) = open(&tmp).await;
    let mut first = doc("manifesto", "x", Some(vec![1.0, 0.0, 0.0]));
    first.content = "first".into();
    let mut second = doc("manifesto", "x", Some(vec![0.0, 1.0, 0.0]));
    second.content = "second".into();

    store.upsert_document(&first).await.unwrap();
    let created = store
        .get_document("manifesto", "x")
        .await
        .unwrap()
        .unwrap()
        .created_at;
    store.upsert_document(&second).await.unwrap();

    let stats = store.document_stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total, 1);

    let stored = store.get_document("manifesto", "x").await.unwrap().unwrap();
    assert_eq!(stored.document.content, "second");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.created_at, created);
}

#[tokio::test]
async fn null_embeddings_never_surface() {
    let tmp = TempDir::new().unwrap();
    let (_, store) = open(&tmp).await;
    store
        .upsert_document(&doc("manifesto", "bare", None))
        .await
        .unwrap();

    let results = search_similar(
        &store,
        &[1.0, 0.0, 0.0],
        &options(10, -1.0, true),
        &BoostPolicy::default(),
    )
    .await
    .unwrap();
    assert!(results.is_empty());
    assert_eq!(store.keyword_lookup("bare", 5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dataset_indexing_reuses_unchanged_embeddings() {
    let tmp = TempDir::new().unwrap();
    let (config, store) = open(&tmp).await;
    let file = tmp.path().join("manifesto.jsonl");
    std::fs::write(
        &file,
        concat!(
            r#"{"chunk_id":"h","title":"Housing","content":"Our housing plan: housing for all."}"#,
            "\n",
            r#"{"chunk_id":"t","title":"Transport","content":"Cheaper public transport."}"#,
            "\n"
        ),
    )
    .unwrap();
    let dataset = FileDataset::single_file(&file, Some("manifesto".into()));
    let opts = index_options(&config, false);

    let first = index_dataset(&store, &TopicProvider, &dataset, &opts, &NoProgress)
        .await
        .unwrap();
    assert_eq!((first.inserted, first.embedded, first.reused), (2, 2, 0));

    let second = index_dataset(&store, &TopicProvider, &dataset, &opts, &NoProgress)
        .await
        .unwrap();
    assert_eq!((second.updated, second.embedded, second.reused), (2, 2, 2));

    let housing = store.get_document("manifesto", "h").await.unwrap().unwrap();
    assert_eq!(housing.document.embedding, Some(vec![2.0, 0.0, 0.0]));
    assert_eq!(housing.embedding_model.as_deref(), Some("topic-v1"));
}

#[tokio::test]
async fn wrong_dimension_is_rejected_per_record() {
    let tmp = TempDir::new().unwrap();
    let (_, store) = open(&tmp).await;
    let err = store
        .upsert_document(&doc("manifesto", "x", Some(vec![1.0, 0.0])))
        .await
        .unwrap_err();
    assert!(!err.is_fatal());
    assert!(store.get_document("manifesto", "x").await.unwrap().is_none());
}

#[tokio::test]
async fn mixed_dimension_rows_are_not_candidates() {
    let tmp = TempDir::new().unwrap();
    let config = Config::from_toml(&format!(
        "[db]\npath = \"{}/policy.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    // Unpinned, as a store left behind by an earlier model would be.
    let store = db::open_store(&config, &DisabledProvider).await.unwrap();
    store
        .upsert_document(&doc("manifesto", "old-1", Some(vec![1.0, 0.0])))
        .await
        .unwrap();
    store
        .upsert_document(&doc("commentary", "old-2", Some(vec![0.0, 1.0])))
        .await
        .unwrap();
    store
        .upsert_document(&doc("manifesto", "new-1", Some(vec![0.0, 1.0, 0.0])))
        .await
        .unwrap();
    store
        .upsert_document(&doc("commentary", "new-2", Some(vec![-1.0, 0.0, 0.0])))
        .await
        .unwrap();
    store
        .upsert_document(&doc("commentary", "zero", Some(vec![0.0, 0.0, 0.0])))
        .await
        .unwrap();

    let results = search_similar(
        &store,
        &[1.0, 0.0, 0.0],
        &options(10, -1.0, false),
        &BoostPolicy::default(),
    )
    .await
    .unwrap();
    let mut ids: Vec<&str> = results
        .iter()
        .map(|r| r.document.document.chunk_id.as_str())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["new-1", "new-2"]);
    assert!((results[1].similarity + 1.0).abs() < 1e-6);

    let none = search_similar(
        &store,
        &[0.0, 0.0, 0.0],
        &options(10, -1.0, false),
        &BoostPolicy::default(),
    )
    .await
    .unwrap();
    assert!(none.is_empty());
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Totals match the number of distinct keys written.
    #[test]
    fn stats_stay_consistent(
        writes in prop::collection::vec(
            (prop::sample::select(vec!["manifesto", "website-page", "curated-answer"]),
             0u8..6,
             any::<bool>()),
            1..25,
        )
    ) {
        let rt = runtime();
        let tmp = TempDir::new().unwrap();
        let (stats, distinct) = rt.block_on(async {
            let (_, store) = open(&tmp).await;
            let mut keys = std::collections::BTreeSet::new();
            for (source_type, n, embedded) in &writes {
                let emb = embedded.then(|| vec![1.0, *n as f32, 0.0]);
                store
                    .upsert_document(&doc(source_type, &format!("c{}", n), emb))
                    .await
                    .unwrap();
                keys.insert((source_type.to_string(), *n));
            }
            let stats = store.document_stats().await.unwrap();
            store.pool().close().await;
            (stats, keys.len() as i64)
        });

        let total: i64 = stats.iter().map(|s| s.total).sum();
        prop_assert_eq!(total, distinct);
        for s in &stats {
            prop_assert!(s.with_embedding <= s.total);
        }
    }

    /// Raising the threshold never adds results.
    #[test]
    fn threshold_is_monotonic(lo in -1.0f64..1.0, delta in 0.0f64..1.0) {
        let hi = (lo + delta).min(1.0);
        let rt = runtime();
        let tmp = TempDir::new().unwrap();
        let (n_lo, n_hi) = rt.block_on(async {
            let (_, store) = open(&tmp).await;
            let vectors = [
                ("manifesto", [1.0f32, 0.0, 0.0]),
                ("manifesto", [0.7, 0.7, 0.0]),
                ("website-page", [0.0, 1.0, 0.0]),
                ("website-page", [-1.0, 0.2, 0.0]),
                ("party-position", [0.3, 0.3, 0.9]),
            ];
            for (i, (st, v)) in vectors.iter().enumerate() {
                store
                    .upsert_document(&doc(st, &format!("d{}", i), Some(v.to_vec())))
                    .await
                    .unwrap();
            }
            let q = [1.0f32, 0.1, 0.0];
            let policy = BoostPolicy::default();
            let a = search_similar(&store, &q, &options(10, lo, true), &policy).await.unwrap();
            let b = search_similar(&store, &q, &options(10, hi, true), &policy).await.unwrap();
            store.pool().close().await;
            (a.len(), b.len())
        });
        prop_assert!(n_hi <= n_lo);
    }
}

//! `search` command: embed a query and print ranked results.

use anyhow::{bail, Context, Result};

use policy_index_core::embedding::{embed_text, EmbeddingProvider};
use policy_index_core::search::{search_similar, BoostPolicy, ScoredDocument, SearchOptions};
use policy_index_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;

/// Queries are never too short to embed; `min_chars` only gates indexing.
const QUERY_MIN_CHARS: usize = 1;

/// Embed `query` and run a similarity search against `store`.
///
/// A blank query returns no results without calling the provider.
pub async fn search_documents<S: Store + ?Sized>(
    store: &S,
    provider: &dyn EmbeddingProvider,
    query: &str,
    options: &SearchOptions,
    policy: &BoostPolicy,
) -> Result<Vec<ScoredDocument>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let query_vec = embed_text(provider, query, QUERY_MIN_CHARS)
        .await
        .context("failed to embed query")?;
    let results = search_similar(store, &query_vec, options, policy).await?;
    tracing::debug!(query, results = results.len(), "search complete");
    Ok(results)
}

/// `policy-index search "<query>"`
pub async fn run_search(
    config: &Config,
    query: &str,
    options: &SearchOptions,
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let provider = create_provider(&config.embedding)?;
    let store = db::open_store(config, provider.as_ref()).await?;
    let results = search_documents(
        &store,
        provider.as_ref(),
        query,
        options,
        &config.retrieval.boost_policy(),
    )
    .await;
    store.pool().close().await;
    let mut results = results?;

    // Vectors are noise in output.
    for r in &mut results {
        r.document.document.embedding = None;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let doc = &result.document.document;
        println!(
            "{}. [{:.3}{}] {} / {}",
            i + 1,
            result.score,
            if result.boosted { " boosted" } else { "" },
            doc.source_type,
            doc.title
        );
        println!("    similarity: {:.3}", result.similarity);
        if let Some(date) = doc.source_date {
            println!("    date: {}", date);
        }
        if let Some(ref url) = doc.source_url {
            println!("    url: {}", url);
        }
        println!("    excerpt: \"{}\"", excerpt(&doc.content, 200));
        println!("    key: {}", doc.key());
        println!();
    }

    Ok(())
}

/// First `max_chars` characters of `text` on one line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

//! Debug lookups: `get` by natural key and `lookup` by keyword.
//!
//! Neither needs an embedding provider, and both show documents that
//! have no embedding.

use anyhow::{bail, Result};

use policy_index_core::store::Store;
use policy_index_core::StoredDocument;

use crate::config::Config;
use crate::db;
use crate::embedding::DisabledProvider;

/// `policy-index get <source_type> <chunk_id>`
pub async fn run_get(config: &Config, source_type: &str, chunk_id: &str, json: bool) -> Result<()> {
    let store = db::open_store(config, &DisabledProvider).await?;
    let found = store.get_document(source_type, chunk_id).await;
    store.pool().close().await;

    let Some(mut doc) = found? else {
        bail!("document not found: {}:{}", source_type, chunk_id);
    };

    if json {
        doc.document.embedding = None;
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    print_document(&doc);
    Ok(())
}

/// `policy-index lookup <term>`
pub async fn run_lookup(config: &Config, term: &str, limit: usize, json: bool) -> Result<()> {
    let store = db::open_store(config, &DisabledProvider).await?;
    let found = store.keyword_lookup(term, limit).await;
    store.pool().close().await;
    let mut docs = found?;

    if json {
        for d in &mut docs {
            d.document.embedding = None;
        }
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }

    if docs.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for d in &docs {
        println!(
            "{}  {}{}",
            d.document.key(),
            d.document.title,
            if d.document.embedding.is_none() {
                "  (no embedding)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn print_document(doc: &StoredDocument) {
    let d = &doc.document;
    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("key:          {}", d.key());
    println!("title:        {}", d.title);
    if let Some(ref url) = d.source_url {
        println!("source_url:   {}", url);
    }
    if let Some(date) = d.source_date {
        println!("source_date:  {}", date);
    }
    println!("version:      {}", doc.version);
    println!("created_at:   {}", format_ts_iso(doc.created_at));
    println!("updated_at:   {}", format_ts_iso(doc.updated_at));
    match (&d.embedding, &doc.embedding_model) {
        (Some(v), Some(model)) => println!("embedding:    {} dims ({})", v.len(), model),
        (Some(v), None) => println!("embedding:    {} dims", v.len()),
        (None, _) => println!("embedding:    none"),
    }
    println!("citation:     {}", d.citation.as_value());
    println!();
    println!("--- Content ---");
    println!("{}", d.content);
    println!();
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

//! Database statistics: what is indexed, and how much of it is searchable.

use anyhow::Result;

use policy_index_core::store::{SourceStats, Store};

use crate::config::Config;
use crate::db;
use crate::embedding::DisabledProvider;

/// `policy-index stats`
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    // Counting needs no provider, and must work with embeddings disabled.
    let store = db::open_store(config, &DisabledProvider).await?;
    let stats = store.document_stats().await;
    store.pool().close().await;
    let stats = stats?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let (total, embedded) = totals(&stats);

    println!("policy-index: Database Stats");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", total);
    println!(
        "  Embedded:    {} / {} ({}%)",
        embedded,
        total,
        if total > 0 { (embedded * 100) / total } else { 0 }
    );

    if !stats.is_empty() {
        println!();
        println!("  By source type:");
        println!("  {:<24} {:>8} {:>10}", "SOURCE TYPE", "DOCS", "EMBEDDED");
        println!("  {}", "-".repeat(44));
        for s in &stats {
            println!(
                "  {:<24} {:>8} {:>10}",
                s.source_type, s.total, s.with_embedding
            );
        }
    }

    println!();
    Ok(())
}

fn totals(stats: &[SourceStats]) -> (i64, i64) {
    stats
        .iter()
        .fold((0, 0), |(t, e), s| (t + s.total, e + s.with_embedding))
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

//! `index` and `index-file` commands.
//!
//! Loads records from configured datasets and feeds them through the
//! generic batch indexer against the SQLite store.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use policy_index_core::embedding::EmbeddingProvider;
use policy_index_core::index::{index_records, IndexOptions, IndexProgress, IndexReport};
use policy_index_core::store::Store;
use policy_index_core::IndexError;

use crate::config::Config;
use crate::dataset::{Dataset, FileDataset};
use crate::db;
use crate::embedding::create_provider;
use crate::progress::ProgressMode;

/// Index options derived from the `[embedding]` section.
pub fn index_options(config: &Config, dry_run: bool) -> IndexOptions {
    IndexOptions {
        min_chars: config.embedding.min_chars,
        reuse_embeddings: config.embedding.reuse_embeddings,
        dry_run,
    }
}

/// Load `dataset` and index every record into `store`.
pub async fn index_dataset<S: Store + ?Sized>(
    store: &S,
    provider: &dyn EmbeddingProvider,
    dataset: &dyn Dataset,
    options: &IndexOptions,
    progress: &dyn IndexProgress,
) -> Result<IndexReport, IndexRunError> {
    let records = dataset
        .records()
        .await
        .map_err(|e| IndexRunError::Load(e.context(format!("dataset '{}'", dataset.name()))))?;
    tracing::info!(dataset = dataset.name(), records = records.len(), "indexing dataset");
    Ok(index_records(store, provider, records, options, progress).await?)
}

/// Failure modes of indexing one dataset.
#[derive(Debug, thiserror::Error)]
pub enum IndexRunError {
    #[error("{0:#}")]
    Load(anyhow::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Resolve `target` to datasets: a configured name, or `all`.
fn select_datasets(config: &Config, target: &str) -> Result<Vec<FileDataset>> {
    if target == "all" {
        if config.datasets.is_empty() {
            bail!("No datasets configured. Add [datasets.<name>] sections to the config.");
        }
        return Ok(config
            .datasets
            .iter()
            .map(|(name, ds)| FileDataset::from_config(name, ds))
            .collect());
    }

    match config.datasets.get(target) {
        Some(ds) => Ok(vec![FileDataset::from_config(target, ds)]),
        None => {
            let available: Vec<&str> = config.datasets.keys().map(|k| k.as_str()).collect();
            bail!(
                "Unknown dataset: '{}'. Available: {}",
                target,
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    format!("{}, all", available.join(", "))
                }
            )
        }
    }
}

/// `policy-index index <dataset|all>`
pub async fn run_index(
    config: &Config,
    target: &str,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let datasets = select_datasets(config, target)?;
    let sets: Vec<&dyn Dataset> = datasets.iter().map(|d| d as &dyn Dataset).collect();
    run_datasets(config, &sets, dry_run, progress).await
}

/// `policy-index index-file <path>`
pub async fn run_index_file(
    config: &Config,
    path: &Path,
    source_type: Option<String>,
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    let dataset = FileDataset::single_file(path, source_type);
    run_datasets(config, &[&dataset as &dyn Dataset], dry_run, progress).await
}

async fn run_datasets(
    config: &Config,
    datasets: &[&dyn Dataset],
    dry_run: bool,
    progress: ProgressMode,
) -> Result<()> {
    if dry_run {
        for dataset in datasets {
            let records = dataset
                .records()
                .await
                .with_context(|| format!("dataset '{}'", dataset.name()))?;
            let mut by_type: BTreeMap<&str, u64> = BTreeMap::new();
            for r in &records {
                *by_type.entry(r.source_type.as_str()).or_default() += 1;
            }
            println!("index {} (dry-run)", dataset.name());
            println!("  records found: {}", records.len());
            for (source_type, n) in by_type {
                println!("    {:<24} {:>6}", source_type, n);
            }
        }
        return Ok(());
    }

    let provider = create_provider(&config.embedding)?;
    if !config.embedding.is_enabled() {
        tracing::warn!("embedding provider is disabled; documents will be stored without vectors");
    }
    let store = db::open_store(config, provider.as_ref()).await?;
    let options = index_options(config, false);

    let mut failed = 0u64;
    for dataset in datasets {
        let reporter = progress.reporter(dataset.name());
        let result = index_dataset(
            &store,
            provider.as_ref(),
            *dataset,
            &options,
            reporter.as_ref(),
        )
        .await;

        match result {
            Ok(report) => {
                print_summary(dataset.name(), &report);
                failed += report.failed_count();
            }
            Err(IndexRunError::Index(IndexError::Aborted { report, source })) => {
                print_summary(dataset.name(), &report);
                store.pool().close().await;
                return Err(anyhow!(source).context(format!(
                    "indexing '{}' aborted after {} of {} records",
                    dataset.name(),
                    report.upserted,
                    report.total
                )));
            }
            Err(e) => {
                store.pool().close().await;
                return Err(e.into());
            }
        }
    }

    store.pool().close().await;
    if failed > 0 {
        bail!("{} record(s) failed to index", failed);
    }
    Ok(())
}

fn print_summary(name: &str, report: &IndexReport) {
    println!("index {}", name);
    println!("  records: {}", report.total);
    println!(
        "  upserted: {} ({} new, {} updated)",
        report.upserted, report.inserted, report.updated
    );
    println!("  embedded: {} ({} reused)", report.embedded, report.reused);
    println!("  embeddings skipped: {}", report.embeddings_skipped);
    println!("  failed: {}", report.failed_count());
    for f in &report.failed {
        println!("    {}  {}", f.key, f.error);
    }
}

//! Record sources for the batch indexer.
//!
//! A [`Dataset`] yields [`IndexRecord`]s; the indexer does not care where
//! they come from. [`FileDataset`] reads JSON (an array of records) or
//! JSON Lines, from a single file or a directory filtered by globs.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use policy_index_core::index::IndexRecord;

use crate::config::DatasetConfig;

/// A named source of records to index.
#[async_trait]
pub trait Dataset: Send + Sync {
    fn name(&self) -> &str;

    /// Load every record, in a deterministic order.
    async fn records(&self) -> Result<Vec<IndexRecord>>;
}

/// Records stored as `.json` / `.jsonl` files on disk.
#[derive(Debug, Clone)]
pub struct FileDataset {
    name: String,
    path: PathBuf,
    source_type: Option<String>,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
}

impl FileDataset {
    pub fn from_config(name: &str, config: &DatasetConfig) -> Self {
        Self {
            name: name.to_string(),
            path: config.path.clone(),
            source_type: config.source_type.clone(),
            include_globs: config.include_globs.clone(),
            exclude_globs: config.exclude_globs.clone(),
        }
    }

    /// An ad-hoc dataset for one file, named after the file.
    pub fn single_file(path: &Path, source_type: Option<String>) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            path: path.to_path_buf(),
            source_type,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
        }
    }

    fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.path.exists() {
            bail!(
                "dataset '{}' path does not exist: {}",
                self.name,
                self.path.display()
            );
        }
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }

        let include_set = build_globset(&self.include_globs)?;
        let exclude_set = build_globset(&self.exclude_globs)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.path) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel_str = path
                .strip_prefix(&self.path)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        // Sort for deterministic ordering
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Dataset for FileDataset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn records(&self) -> Result<Vec<IndexRecord>> {
        let mut records = Vec::new();
        for file in self.files()? {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let is_jsonl = file.extension().is_some_and(|e| e == "jsonl");
            let parsed = parse_records(
                &text,
                is_jsonl,
                &file.display().to_string(),
                self.source_type.as_deref(),
            )?;
            tracing::debug!(dataset = %self.name, file = %file.display(), records = parsed.len(), "loaded");
            records.extend(parsed);
        }
        Ok(records)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Parse one file's worth of records.
///
/// A record without a `chunk_id`, or without a `source_type` when no
/// default is given, fails the whole file.
pub fn parse_records(
    text: &str,
    is_jsonl: bool,
    origin: &str,
    default_source_type: Option<&str>,
) -> Result<Vec<IndexRecord>> {
    let values: Vec<(String, serde_json::Value)> = if is_jsonl {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                let at = format!("{}:{}", origin, i + 1);
                serde_json::from_str(line)
                    .map(|v| (at.clone(), v))
                    .with_context(|| format!("invalid JSON at {}", at))
            })
            .collect::<Result<_>>()?
    } else {
        let parsed: serde_json::Value =
            serde_json::from_str(text).with_context(|| format!("invalid JSON in {}", origin))?;
        let serde_json::Value::Array(items) = parsed else {
            bail!("{}: expected a JSON array of records", origin);
        };
        items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("{}[{}]", origin, i), v))
            .collect()
    };

    let mut records = Vec::with_capacity(values.len());
    for (at, value) in values {
        let has_chunk_id = value
            .get("chunk_id")
            .and_then(|c| c.as_str())
            .is_some_and(|c| !c.trim().is_empty());
        if !has_chunk_id {
            bail!("{}: record is missing chunk_id", at);
        }

        let mut record: IndexRecord =
            serde_json::from_value(value).with_context(|| format!("invalid record at {}", at))?;
        if record.source_type.is_empty() {
            match default_source_type {
                Some(st) => record.source_type = st.to_string(),
                None => bail!("{}: record has no source_type and the dataset sets none", at),
            }
        }
        records.push(record);
    }
    Ok(records)
}

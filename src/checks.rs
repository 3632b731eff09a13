//! Retrieval checks: assertions about which documents a query retrieves.
//!
//! A checks file holds `[[check]]` tables:
//!
//! ```toml
//! [[check]]
//! name = "housing"
//! query = "What is the party's housing policy?"
//! expect = ["manifesto:housing-1"]
//! forbid = ["website-page:old-housing"]
//! top_k = 3
//! ```
//!
//! A check passes when every `expect` key is among the top `top_k` results
//! and no `forbid` key is.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use policy_index_core::embedding::EmbeddingProvider;
use policy_index_core::search::{BoostPolicy, ScoredDocument, SearchOptions};
use policy_index_core::store::Store;
use policy_index_core::DocumentKey;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::search::search_documents;

#[derive(Debug, Deserialize)]
struct ChecksFile {
    #[serde(default, rename = "check")]
    checks: Vec<RawCheck>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    name: String,
    query: String,
    #[serde(default)]
    expect: Vec<String>,
    #[serde(default)]
    forbid: Vec<String>,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCheck {
    pub name: String,
    pub query: String,
    pub expect: Vec<DocumentKey>,
    pub forbid: Vec<DocumentKey>,
    /// Falls back to the configured retrieval limit.
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub retrieved: Vec<DocumentKey>,
    /// Expected keys not in the top results.
    pub missing: Vec<DocumentKey>,
    /// Forbidden keys that were retrieved.
    pub forbidden: Vec<DocumentKey>,
    /// Set when the query could not be run at all.
    pub error: Option<String>,
}

fn parse_keys(check: &str, field: &str, raw: Vec<String>) -> Result<Vec<DocumentKey>> {
    raw.iter()
        .map(|k| {
            DocumentKey::from_str(k)
                .map_err(|e| anyhow::anyhow!("check '{}' {}: {}", check, field, e))
        })
        .collect()
}

/// Parse a checks file.
pub fn parse_checks(text: &str) -> Result<Vec<RetrievalCheck>> {
    let file: ChecksFile = toml::from_str(text).context("failed to parse checks file")?;
    let mut checks = Vec::with_capacity(file.checks.len());
    for raw in file.checks {
        if raw.expect.is_empty() && raw.forbid.is_empty() {
            bail!("check '{}' has neither expect nor forbid", raw.name);
        }
        if raw.top_k == Some(0) {
            bail!("check '{}': top_k must be >= 1", raw.name);
        }
        checks.push(RetrievalCheck {
            expect: parse_keys(&raw.name, "expect", raw.expect)?,
            forbid: parse_keys(&raw.name, "forbid", raw.forbid)?,
            name: raw.name,
            query: raw.query,
            top_k: raw.top_k,
        });
    }
    Ok(checks)
}

pub fn load_checks(path: &Path) -> Result<Vec<RetrievalCheck>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read checks file {}", path.display()))?;
    parse_checks(&text)
}

/// Judge one check against the results of its query.
pub fn evaluate(check: &RetrievalCheck, results: &[ScoredDocument]) -> CheckOutcome {
    let retrieved: Vec<DocumentKey> = results.iter().map(|r| r.document.document.key()).collect();
    let missing: Vec<DocumentKey> = check
        .expect
        .iter()
        .filter(|k| !retrieved.contains(k))
        .cloned()
        .collect();
    let forbidden: Vec<DocumentKey> = check
        .forbid
        .iter()
        .filter(|k| retrieved.contains(k))
        .cloned()
        .collect();

    CheckOutcome {
        name: check.name.clone(),
        passed: missing.is_empty() && forbidden.is_empty(),
        retrieved,
        missing,
        forbidden,
        error: None,
    }
}

/// Run every check in order. A query that fails to embed or search fails
/// its check; the remaining checks still run.
pub async fn run_checks<S: Store + ?Sized>(
    store: &S,
    provider: &dyn EmbeddingProvider,
    checks: &[RetrievalCheck],
    options: &SearchOptions,
    policy: &BoostPolicy,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let opts = SearchOptions {
            limit: check.top_k.unwrap_or(options.limit),
            ..options.clone()
        };
        let outcome = match search_documents(store, provider, &check.query, &opts, policy).await {
            Ok(results) => evaluate(check, &results),
            Err(e) => CheckOutcome {
                name: check.name.clone(),
                passed: false,
                retrieved: Vec::new(),
                missing: check.expect.clone(),
                forbidden: Vec::new(),
                error: Some(format!("{:#}", e)),
            },
        };
        tracing::debug!(check = %outcome.name, passed = outcome.passed, "check evaluated");
        outcomes.push(outcome);
    }
    outcomes
}

/// `policy-index check <file>`. Returns whether every check passed.
pub async fn run_check_command(config: &Config, path: &Path, json: bool) -> Result<bool> {
    if !config.embedding.is_enabled() {
        bail!("Checks require embeddings. Set [embedding] provider in config.");
    }
    let checks = load_checks(path)?;
    let provider = create_provider(&config.embedding)?;
    let store = db::open_store(config, provider.as_ref()).await?;
    let outcomes = run_checks(
        &store,
        provider.as_ref(),
        &checks,
        &config.retrieval.search_options(None, None, false)?,
        &config.retrieval.boost_policy(),
    )
    .await;
    store.pool().close().await;

    let failed = outcomes.iter().filter(|o| !o.passed).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(failed == 0);
    }

    for o in &outcomes {
        println!("{} {}", if o.passed { "PASS" } else { "FAIL" }, o.name);
        if let Some(ref e) = o.error {
            println!("    error: {}", e);
        }
        for k in &o.missing {
            println!("    missing: {}", k);
        }
        for k in &o.forbidden {
            println!("    forbidden: {}", k);
        }
    }
    println!();
    println!("{} passed, {} failed", outcomes.len() - failed, failed);

    Ok(failed == 0)
}

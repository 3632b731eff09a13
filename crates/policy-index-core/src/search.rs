//! Similarity search with policy-source boosting.
//!
//! The algorithm operates entirely through the [`Store`] trait. The caller
//! embeds the query, builds [`SearchOptions`] and a [`BoostPolicy`], and
//! passes the store implementation.
//!
//! # Ranking
//!
//! 1. Fetch a [`VectorCandidate`] for every document with an embedding.
//! 2. Drop candidates outside the requested source types (if any).
//! 3. Admit candidates whose **raw** similarity is `>= threshold`.
//! 4. Ranking score = similarity, plus `bonus` for policy source types when
//!    boosting is enabled.
//! 5. Sort by score (desc), then row id (asc) so ties follow insertion order.
//! 6. Truncate to `limit` and load the documents.
//!
//! Admission is decided before boosting: a policy document below the
//! threshold never appears, and boosting only reorders admitted documents.

use serde::Serialize;

use crate::error::StoreError;
use crate::models::StoredDocument;
use crate::store::{Store, VectorCandidate};

/// Default additive bonus for policy sources.
pub const DEFAULT_POLICY_BONUS: f64 = 0.05;

/// Per-query search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results to return.
    pub limit: usize,
    /// Minimum raw similarity for a document to be returned.
    pub threshold: f64,
    /// Rank designated policy sources above incidental mentions.
    pub boost_policy_sources: bool,
    /// Only consider these source types; empty means all.
    pub source_types: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.5,
            boost_policy_sources: false,
            source_types: Vec::new(),
        }
    }
}

/// Which source types count as official policy, and how much they gain.
#[derive(Debug, Clone)]
pub struct BoostPolicy {
    pub policy_source_types: Vec<String>,
    /// Additive bonus applied to the ranking score.
    pub bonus: f64,
}

impl Default for BoostPolicy {
    fn default() -> Self {
        Self {
            policy_source_types: vec!["manifesto".to_string(), "party-position".to_string()],
            bonus: DEFAULT_POLICY_BONUS,
        }
    }
}

impl BoostPolicy {
    pub fn is_policy_source(&self, source_type: &str) -> bool {
        self.policy_source_types.iter().any(|s| s == source_type)
    }
}

/// A search hit: the stored document plus its raw and ranking scores.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: StoredDocument,
    /// Raw cosine similarity to the query.
    pub similarity: f64,
    /// Ranking score (similarity plus any boost).
    pub score: f64,
    /// Whether the policy bonus was applied.
    pub boosted: bool,
}

/// A candidate that survived admission, with its ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub id: i64,
    pub similarity: f64,
    pub score: f64,
    pub boosted: bool,
}

/// Filter, boost, order, and truncate raw candidates.
///
/// Pure function; [`search_similar`] wraps it with store access.
pub fn rank_candidates(
    candidates: &[VectorCandidate],
    options: &SearchOptions,
    policy: &BoostPolicy,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .iter()
        .filter(|c| {
            options.source_types.is_empty() || options.source_types.contains(&c.source_type)
        })
        .filter(|c| c.similarity >= options.threshold)
        .map(|c| {
            let boosted = options.boost_policy_sources && policy.is_policy_source(&c.source_type);
            let score = if boosted {
                c.similarity + policy.bonus
            } else {
                c.similarity
            };
            RankedCandidate {
                id: c.id,
                similarity: c.similarity,
                score,
                boosted,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    ranked.truncate(options.limit);
    ranked
}

/// Find up to `options.limit` documents most similar to `query_vec`.
///
/// Returns an empty vector (not an error) when nothing clears the
/// threshold, when `limit` is zero, or when the query vector is empty or
/// all zeros. Stored embeddings of another length are not candidates.
pub async fn search_similar<S: Store + ?Sized>(
    store: &S,
    query_vec: &[f32],
    options: &SearchOptions,
    policy: &BoostPolicy,
) -> Result<Vec<ScoredDocument>, StoreError> {
    if query_vec.is_empty() || options.limit == 0 {
        return Ok(Vec::new());
    }

    let candidates = store.vector_candidates(query_vec).await?;
    let ranked = rank_candidates(&candidates, options, policy);
    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = ranked.iter().map(|r| r.id).collect();
    let docs = store.get_documents(&ids).await?;

    // A row may vanish between the two calls; skip it rather than fail.
    let results = ranked
        .into_iter()
        .filter_map(|r| {
            docs.iter()
                .find(|d| d.id == r.id)
                .map(|d| ScoredDocument {
                    document: d.clone(),
                    similarity: r.similarity,
                    score: r.score,
                    boosted: r.boosted,
                })
        })
        .collect();

    tracing::debug!(
        candidates = candidates.len(),
        threshold = options.threshold,
        boost = options.boost_policy_sources,
        "similarity search complete"
    );

    Ok(results)
}

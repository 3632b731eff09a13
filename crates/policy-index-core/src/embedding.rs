//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the [`embed_text`] adapter used by the indexer and query path,
//! plus pure helpers for vector serialization and similarity computation.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `policy-index`
//! app crate.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Texts shorter than this (after trimming) are not worth embedding.
pub const DEFAULT_MIN_CHARS: usize = 10;

/// Trait for embedding providers.
///
/// Implementations turn text into fixed-length vectors. Identical input
/// should yield the same vector, within the determinism of the model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed a single text, skipping trivially short input.
///
/// Returns [`EmbeddingError::TooShort`] without calling the provider when the
/// trimmed text has fewer than `min_chars` characters, and
/// [`EmbeddingError::Dimension`] when the provider's vector does not match its
/// declared [`dims`](EmbeddingProvider::dims).
pub async fn embed_text(
    provider: &dyn EmbeddingProvider,
    text: &str,
    min_chars: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let len = text.trim().chars().count();
    if len < min_chars {
        return Err(EmbeddingError::TooShort {
            len,
            min: min_chars,
        });
    }

    let vector = provider
        .embed_texts(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or(EmbeddingError::EmptyResponse)?;

    let expected = provider.dims();
    if expected > 0 && vector.len() != expected {
        return Err(EmbeddingError::Dimension {
            expected,
            actual: vector.len(),
        });
    }

    Ok(vector)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use policy_index_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]. Trailing bytes that do not form a whole `f32`
/// are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `None` for empty vectors, zero vectors, or vectors of different
/// lengths: there is no meaningful similarity to rank on.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return None;
    }

    Some(dot / denom)
}

//! Core data models for the retrieval pipeline.
//!
//! A [`Document`] is what callers hand to the store; a [`StoredDocument`]
//! is what comes back, carrying the storage-side identity and history.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Structured attribution for a document (who said or wrote it, when, in
/// what context, and where).
///
/// The store treats citations as opaque JSON and returns them verbatim.
/// Extra keys beyond `who`/`when`/`context`/`url` are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Citation(serde_json::Value);

impl Citation {
    /// Build a citation with the four conventional attribution fields.
    pub fn attribution(who: &str, when: &str, context: &str, url: Option<&str>) -> Self {
        Self(serde_json::json!({
            "who": who,
            "when": when,
            "context": context,
            "url": url,
        }))
    }

    /// Look up a top-level string field, for display purposes.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl Default for Citation {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl From<serde_json::Value> for Citation {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A searchable unit of text, as supplied by an indexing run.
///
/// `(source_type, chunk_id)` is the natural key: upserting a document with
/// the same key replaces the stored row in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Category tag, e.g. `manifesto`, `website-page`, `curated-answer`.
    pub source_type: String,
    /// Caller-assigned identifier, unique within `source_type`.
    pub chunk_id: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_date: Option<NaiveDate>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub citation: Citation,
    /// Vector derived from `content`. `None` excludes the document from
    /// similarity search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.source_type, &self.chunk_id)
    }
}

/// A document as persisted by a [`Store`](crate::store::Store).
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    /// Store-assigned row id; increases with insertion order.
    pub id: i64,
    #[serde(flatten)]
    pub document: Document,
    /// SHA-256 of `content` at the time of the last upsert.
    pub content_hash: String,
    /// Model that produced `embedding`, if known.
    pub embedding_model: Option<String>,
    /// Starts at 1; incremented on every overwrite.
    pub version: i64,
    /// Unix timestamp of the first insert. Never changes.
    pub created_at: i64,
    /// Unix timestamp of the latest upsert.
    pub updated_at: i64,
}

/// The natural key of a document, written `source_type:chunk_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub source_type: String,
    pub chunk_id: String,
}

impl DocumentKey {
    pub fn new(source_type: &str, chunk_id: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            chunk_id: chunk_id.to_string(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.chunk_id)
    }
}

impl FromStr for DocumentKey {
    type Err = String;

    /// Parses `source_type:chunk_id`. Only the first `:` separates the two
    /// parts, so chunk ids may themselves contain colons.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((st, id)) if !st.is_empty() && !id.is_empty() => Ok(Self::new(st, id)),
            _ => Err(format!(
                "invalid document key '{}': expected source_type:chunk_id",
                s
            )),
        }
    }
}

/// Hex-encoded SHA-256 of a text, used to detect unchanged content.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrips_through_display() {
        let key = DocumentKey::new("manifesto", "housing-01");
        assert_eq!(key.to_string(), "manifesto:housing-01");
        assert_eq!("manifesto:housing-01".parse::<DocumentKey>().unwrap(), key);
    }

    #[test]
    fn key_keeps_colons_in_chunk_id() {
        let key: DocumentKey = "website-page:https://example.org/a".parse().unwrap();
        assert_eq!(key.source_type, "website-page");
        assert_eq!(key.chunk_id, "https://example.org/a");
    }

    #[test]
    fn key_rejects_missing_parts() {
        assert!("manifesto".parse::<DocumentKey>().is_err());
        assert!(":doc".parse::<DocumentKey>().is_err());
        assert!("manifesto:".parse::<DocumentKey>().is_err());
    }

    #[test]
    fn citation_is_passed_through_verbatim() {
        let raw = serde_json::json!({
            "who": "Party chair",
            "when": "2024-10-01",
            "context": "Campaign launch",
            "url": null,
            "page": 12
        });
        let doc: Document = serde_json::from_value(serde_json::json!({
            "source_type": "manifesto",
            "chunk_id": "doc-1",
            "title": "Housing",
            "content": "Affordable housing policy",
            "citation": raw.clone(),
        }))
        .unwrap();
        assert_eq!(doc.citation.as_value(), &raw);
        assert_eq!(doc.citation.field("who"), Some("Party chair"));
        assert!(doc.embedding.is_none());
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}

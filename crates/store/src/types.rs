use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Filter mapping from attribute name to a scalar or a set of scalars.
/// `BTreeMap` keeps key order canonical for cache-key hashing.
pub type Filters = BTreeMap<String, Value>;

/// A stored, indexed document. Vectors are immutable once stored; a reindex
/// replaces the whole document (same ID, fresh metadata and vector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Document {
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>, vector: Vec<f32>) -> Self {
        let now = unix_ms();
        Self {
            id: id.into(),
            content: content.into(),
            vector,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Path this document was chunked from, when the connector recorded one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.metadata.get("path").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    #[serde(default)]
    pub filters: Filters,
}

impl SearchOptions {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            threshold: 0.0,
            filters: Filters::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

/// One ranked hit. `score` is the final monotonic relevance number;
/// `sparse_score`/`dense_score` record provenance, `reranked_from` the
/// 0-based index in the fused list before reranking.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranked_from: Option<usize>,
}

impl SearchResult {
    #[must_use]
    pub fn sparse(document: Document, score: f32) -> Self {
        Self {
            document,
            score,
            sparse_score: Some(score),
            dense_score: None,
            reranked_from: None,
        }
    }

    #[must_use]
    pub fn dense(document: Document, score: f32) -> Self {
        Self {
            document,
            score,
            sparse_score: None,
            dense_score: Some(score),
            reranked_from: None,
        }
    }
}

/// Does a document's metadata satisfy the filter mapping?
///
/// A scalar filter value requires equality; an array value is a set and
/// matches when it contains the document's value. A key the document does
/// not carry never matches (unknown filter keys do not error).
#[must_use]
pub fn match_filters(metadata: &BTreeMap<String, Value>, filters: &Filters) -> bool {
    filters.iter().all(|(key, wanted)| {
        let Some(actual) = metadata.get(key) else {
            return false;
        };
        match wanted {
            Value::Array(set) => set.iter().any(|candidate| candidate == actual),
            scalar => scalar == actual,
        }
    })
}

/// Shared tokenisation for the sparse index and the lexical reranker:
/// lowercase, split on non-alphanumerics, drop one-character fragments.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_ascii_lowercase)
        .collect()
}

pub(crate) fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_and_set_filters() {
        let doc = Document::new("d1", "fn main() {}", vec![0.0; 4])
            .with_metadata("language", "rust")
            .with_metadata("source_type", "code");

        let mut filters = Filters::new();
        filters.insert("language".into(), json!("rust"));
        assert!(match_filters(&doc.metadata, &filters));

        filters.insert("language".into(), json!(["python", "rust"]));
        assert!(match_filters(&doc.metadata, &filters));

        filters.insert("language".into(), json!("go"));
        assert!(!match_filters(&doc.metadata, &filters));
    }

    #[test]
    fn unknown_filter_keys_do_not_match() {
        let doc = Document::new("d1", "text", vec![]);
        let mut filters = Filters::new();
        filters.insert("git_branch".into(), json!("main"));
        assert!(!match_filters(&doc.metadata, &filters));
    }

    #[test]
    fn tokenize_lowercases_and_drops_short_fragments() {
        assert_eq!(
            tokenize("Handle_Error(x): retry-loop"),
            vec!["handle", "error", "retry", "loop"]
        );
    }
}

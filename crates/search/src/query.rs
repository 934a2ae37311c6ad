use conexus_store::Filters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the two retrieval arms are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HybridMode {
    /// BM25 only, source ordering preserved.
    Sparse,
    /// Vector similarity only, source ordering preserved.
    Dense,
    /// Reciprocal Rank Fusion across both arms.
    #[default]
    Rrf,
    /// Min-max normalised weighted sum of both arms.
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub filters: Filters,
    pub limit: usize,
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub hybrid_mode: HybridMode,
}

impl Query {
    #[must_use]
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            filters: Filters::new(),
            limit: limit.max(1),
            threshold: 0.0,
            hybrid_mode: HybridMode::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: HybridMode) -> Self {
        self.hybrid_mode = mode;
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

/// Optional per-request hints used by the classifier and tool handlers to
/// bias ranking toward the caller's current work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_tickets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub project_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub session: BTreeMap<String, String>,
}

impl WorkContext {
    /// Flatten into attribute -> value text for context-rule matching.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        if let Some(file) = &self.active_file {
            attrs.insert("active_file".to_string(), file.clone());
        }
        if let Some(branch) = &self.git_branch {
            attrs.insert("git_branch".to_string(), branch.clone());
        }
        if !self.open_tickets.is_empty() {
            attrs.insert("open_tickets".to_string(), self.open_tickets.join(" "));
        }
        if !self.recent_files.is_empty() {
            attrs.insert("recent_files".to_string(), self.recent_files.join(" "));
        }
        if !self.project_tags.is_empty() {
            attrs.insert("project_tags".to_string(), self.project_tags.join(" "));
        }
        for (key, value) in &self.session {
            attrs.insert(format!("session.{key}"), value.clone());
        }
        attrs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_file.is_none()
            && self.git_branch.is_none()
            && self.open_tickets.is_empty()
            && self.recent_files.is_empty()
            && self.project_tags.is_empty()
            && self.session.is_empty()
    }
}

use crate::error::{Result, SearchError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// The six predefined profiles. They can be tuned but never removed.
pub const BUILTIN_PROFILES: [&str; 6] = [
    "code-analysis",
    "documentation",
    "debugging",
    "architecture",
    "security",
    "general",
];

/// Token budget for assembling a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextWindow {
    pub min_tokens: usize,
    pub optimal_tokens: usize,
    pub max_tokens: usize,
    pub overlap_ratio: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl ContextWindow {
    /// How many chunks of `chunk_size` tokens fit the budget. Always ≥ 1 so
    /// a tight window still returns something.
    #[must_use]
    pub fn max_results(&self, chunk_size: usize) -> usize {
        (self.max_tokens / chunk_size.max(1)).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Fixed,
    Semantic,
    AstAware,
    Sentence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingStrategy {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub overlap: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub language_rules: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub content_type_rules: BTreeMap<String, String>,
}

/// Ranking weights the pipeline derives fusion parameters from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RankingWeights {
    pub sparse: f32,
    pub dense: f32,
}

/// Named parameter bundle tuning token budget, chunking, and ranking to a
/// class of tasks. `keywords`/`patterns`/`context_rules` feed the
/// classifier; `weight` scales its blended score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub description: String,
    pub context_window: ContextWindow,
    pub chunking: ChunkingStrategy,
    pub weights: RankingWeights,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimization_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_rules: BTreeMap<String, Vec<String>>,
    pub weight: f32,
    /// Pipeline deadline for queries classified to this profile.
    pub timeout_ms: u64,
}

impl AgentProfile {
    pub fn validate(&self) -> Result<()> {
        let window = &self.context_window;
        if window.min_tokens == 0 {
            return Err(SearchError::InvalidProfile(format!(
                "{}: context window min_tokens must be > 0",
                self.id
            )));
        }
        if window.optimal_tokens < window.min_tokens || window.max_tokens < window.optimal_tokens {
            return Err(SearchError::InvalidProfile(format!(
                "{}: context window requires min ≤ optimal ≤ max (got {}/{}/{})",
                self.id, window.min_tokens, window.optimal_tokens, window.max_tokens
            )));
        }
        if !(0.0..1.0).contains(&window.overlap_ratio) {
            return Err(SearchError::InvalidProfile(format!(
                "{}: overlap_ratio must be in [0, 1)",
                self.id
            )));
        }
        if self.chunking.chunk_size == 0 {
            return Err(SearchError::InvalidProfile(format!(
                "{}: chunk_size must be > 0",
                self.id
            )));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(SearchError::InvalidProfile(format!(
                "{}: chunk overlap {} must be smaller than chunk_size {}",
                self.id, self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        Ok(())
    }
}

pub(crate) struct StoredProfile {
    pub profile: AgentProfile,
    pub patterns: Vec<Regex>,
}

impl StoredProfile {
    fn compile(profile: AgentProfile) -> Result<Self> {
        let mut patterns = Vec::with_capacity(profile.patterns.len());
        for raw in &profile.patterns {
            let regex = Regex::new(raw).map_err(|source| SearchError::InvalidPattern {
                profile: profile.id.clone(),
                source,
            })?;
            patterns.push(regex);
        }
        Ok(Self { profile, patterns })
    }
}

/// Registry of agent profiles: the six built-ins plus custom additions.
pub struct ProfileManager {
    profiles: RwLock<HashMap<String, StoredProfile>>,
}

impl ProfileManager {
    #[must_use]
    pub fn new() -> Self {
        let mut profiles = HashMap::new();
        for profile in builtin_profiles() {
            // Built-ins are constructed in code; their patterns are known
            // to compile and their invariants hold by construction.
            if let Ok(stored) = StoredProfile::compile(profile) {
                profiles.insert(stored.profile.id.clone(), stored);
            }
        }
        Self {
            profiles: RwLock::new(profiles),
        }
    }

    pub fn register(&self, profile: AgentProfile) -> Result<()> {
        profile.validate()?;
        let stored = StoredProfile::compile(profile)?;
        let mut profiles = self.write();
        if profiles.contains_key(&stored.profile.id) {
            return Err(SearchError::InvalidProfile(format!(
                "profile '{}' already exists",
                stored.profile.id
            )));
        }
        profiles.insert(stored.profile.id.clone(), stored);
        Ok(())
    }

    pub fn update(&self, profile: AgentProfile) -> Result<()> {
        profile.validate()?;
        let stored = StoredProfile::compile(profile)?;
        let mut profiles = self.write();
        if !profiles.contains_key(&stored.profile.id) {
            return Err(SearchError::ProfileNotFound(stored.profile.id));
        }
        profiles.insert(stored.profile.id.clone(), stored);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        if BUILTIN_PROFILES.contains(&id) {
            return Err(SearchError::BuiltinProfile(id.to_string()));
        }
        let mut profiles = self.write();
        if profiles.remove(id).is_none() {
            return Err(SearchError::ProfileNotFound(id.to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<AgentProfile> {
        self.read().get(id).map(|stored| stored.profile.clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<AgentProfile> {
        let mut profiles: Vec<AgentProfile> = self
            .read()
            .values()
            .map(|stored| stored.profile.clone())
            .collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    /// Snapshot of (profile, compiled patterns) for the classifier.
    pub(crate) fn scoring_snapshot(&self) -> Vec<(AgentProfile, Vec<Regex>)> {
        self.read()
            .values()
            .map(|stored| (stored.profile.clone(), stored.patterns.clone()))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredProfile>> {
        self.profiles
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredProfile>> {
        self.profiles
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

fn profile(
    id: &str,
    description: &str,
    window: (usize, usize, usize),
    chunk: (ChunkStrategy, usize, usize),
    weights: (f32, f32),
    keywords: &[&str],
    patterns: &[&str],
    context_rules: &[(&str, &[&str])],
) -> AgentProfile {
    AgentProfile {
        id: id.to_string(),
        description: description.to_string(),
        context_window: ContextWindow {
            min_tokens: window.0,
            optimal_tokens: window.1,
            max_tokens: window.2,
            overlap_ratio: 0.1,
            compression: None,
        },
        chunking: ChunkingStrategy {
            strategy: chunk.0,
            chunk_size: chunk.1,
            overlap: chunk.2,
            language_rules: BTreeMap::new(),
            content_type_rules: BTreeMap::new(),
        },
        weights: RankingWeights {
            sparse: weights.0,
            dense: weights.1,
        },
        priority_features: Vec::new(),
        optimization_hints: Vec::new(),
        keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
        patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
        context_rules: context_rules
            .iter()
            .map(|(key, values)| {
                (
                    (*key).to_string(),
                    values.iter().map(|v| (*v).to_string()).collect(),
                )
            })
            .collect(),
        weight: 1.0,
        timeout_ms: 10_000,
    }
}

fn builtin_profiles() -> Vec<AgentProfile> {
    vec![
        profile(
            "code-analysis",
            "Understanding implementations, call paths, and APIs",
            (512, 4096, 8192),
            (ChunkStrategy::AstAware, 400, 50),
            (0.4, 0.6),
            &[
                "function", "implementation", "method", "class", "struct", "api", "refactor",
                "call", "usage",
            ],
            &[r"\bfn\s+\w+", r"\bimpl\b", r"\bhow (is|does) .+ (work|implemented)"],
            &[("active_file", &[".rs", ".go", ".py", ".ts", ".js"])],
        ),
        profile(
            "documentation",
            "Guides, READMEs, and prose answers",
            (256, 2048, 4096),
            (ChunkStrategy::Sentence, 300, 30),
            (0.5, 0.5),
            &[
                "docs", "documentation", "readme", "guide", "tutorial", "usage", "install",
                "example", "changelog",
            ],
            &[r"(?i)how to\b", r"(?i)\bdocs?\b", r"\.mdx?\b"],
            &[("active_file", &[".md", ".mdx", ".rst"])],
        ),
        profile(
            "debugging",
            "Failures, stack traces, and regressions",
            (512, 4096, 8192),
            (ChunkStrategy::Semantic, 400, 50),
            (0.6, 0.4),
            &[
                "error", "bug", "panic", "crash", "fail", "failing", "broken", "regression",
                "trace", "stack",
            ],
            &[r"(?i)error:", r"(?i)panicked at", r"(?i)exception\b", r"(?i)\bfix(es|ed)?\b"],
            &[("session.mode", &["debug"]), ("open_tickets", &["BUG", "INC"])],
        ),
        profile(
            "architecture",
            "System structure, boundaries, and design decisions",
            (1024, 6144, 12288),
            (ChunkStrategy::Semantic, 600, 80),
            (0.3, 0.7),
            &[
                "architecture", "design", "structure", "component", "boundary", "dependency",
                "layer", "module", "overview",
            ],
            &[r"(?i)how (is|are) .+ (structured|organized)", r"(?i)\badr\b", r"(?i)\brfc\b"],
            &[("project_tags", &["architecture", "design"])],
        ),
        profile(
            "security",
            "Vulnerabilities, secrets handling, and hardening",
            (512, 4096, 8192),
            (ChunkStrategy::Semantic, 400, 50),
            (0.5, 0.5),
            &[
                "security", "vulnerability", "cve", "auth", "authentication", "authorization",
                "token", "secret", "injection", "sanitize",
            ],
            &[r"(?i)\bcve-\d{4}-\d+", r"(?i)\bxss\b", r"(?i)sql injection"],
            &[("project_tags", &["security"]), ("open_tickets", &["SEC"])],
        ),
        profile(
            "general",
            "Fallback profile for everything else",
            (256, 2048, 8192),
            (ChunkStrategy::Fixed, 400, 50),
            (0.3, 0.7),
            &[],
            &[],
            &[],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(id: &str) -> AgentProfile {
        let mut p = builtin_profiles().remove(5);
        p.id = id.to_string();
        p
    }

    #[test]
    fn builtins_are_present_and_valid() {
        let manager = ProfileManager::new();
        for id in BUILTIN_PROFILES {
            let profile = manager.get(id).unwrap_or_else(|| panic!("missing {id}"));
            profile.validate().unwrap();
        }
    }

    #[test]
    fn builtins_cannot_be_removed() {
        let manager = ProfileManager::new();
        let err = manager.remove("general").unwrap_err();
        assert!(matches!(err, SearchError::BuiltinProfile(_)));
        assert!(manager.get("general").is_some());
    }

    #[test]
    fn custom_profiles_register_and_remove() {
        let manager = ProfileManager::new();
        manager.register(custom("data-pipelines")).unwrap();
        assert!(manager.get("data-pipelines").is_some());
        manager.remove("data-pipelines").unwrap();
        assert!(manager.get("data-pipelines").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let manager = ProfileManager::new();
        let err = manager.register(custom("general")).unwrap_err();
        assert!(matches!(err, SearchError::InvalidProfile(_)));
    }

    #[test]
    fn window_invariants_are_enforced() {
        let mut p = custom("bad");
        p.context_window.min_tokens = 0;
        assert!(p.validate().is_err());

        let mut p = custom("bad");
        p.context_window.max_tokens = p.context_window.optimal_tokens - 1;
        assert!(p.validate().is_err());

        let mut p = custom("bad");
        p.context_window.optimal_tokens = p.context_window.min_tokens - 1;
        assert!(p.validate().is_err());

        let mut p = custom("bad");
        p.context_window.overlap_ratio = 1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn chunking_invariants_are_enforced() {
        let mut p = custom("bad");
        p.chunking.chunk_size = 0;
        assert!(p.validate().is_err());

        let mut p = custom("bad");
        p.chunking.overlap = p.chunking.chunk_size;
        assert!(p.validate().is_err());
    }

    #[test]
    fn invalid_patterns_are_rejected_at_registration() {
        let mut p = custom("bad-pattern");
        p.patterns = vec!["(unclosed".to_string()];
        let manager = ProfileManager::new();
        let err = manager.register(p).unwrap_err();
        assert!(matches!(err, SearchError::InvalidPattern { .. }));
    }

    #[test]
    fn context_window_caps_result_count() {
        let window = ContextWindow {
            min_tokens: 100,
            optimal_tokens: 500,
            max_tokens: 1000,
            overlap_ratio: 0.1,
            compression: None,
        };
        assert_eq!(window.max_results(400), 2);
        assert_eq!(window.max_results(2000), 1);
    }
}

use crate::profile::ProfileManager;
use crate::query::WorkContext;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

const GENERAL_PROFILE: &str = "general";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProfileAlternative {
    pub profile_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub profile_id: String,
    pub confidence: f32,
    pub reasoning: String,
    pub alternatives: Vec<ProfileAlternative>,
}

/// Maps a query plus work context onto an agent profile.
///
/// Per candidate profile three sub-scores are blended:
/// `0.4·keywords + 0.4·patterns + 0.2·context`, scaled by the profile
/// weight and clamped to [0, 1]. Below the confidence threshold the
/// classifier falls back to the general profile.
pub struct Classifier {
    manager: Arc<ProfileManager>,
    threshold: f32,
}

struct Scored {
    profile_id: String,
    score: f32,
    matched_keywords: usize,
    matched_patterns: usize,
    matched_rules: usize,
}

impl Classifier {
    #[must_use]
    pub fn new(manager: Arc<ProfileManager>) -> Self {
        Self {
            manager,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn classify(&self, query: &str, work_context: &WorkContext) -> Classification {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Classification {
                profile_id: GENERAL_PROFILE.to_string(),
                confidence: 0.5,
                reasoning: "Empty query, using general profile".to_string(),
                alternatives: Vec::new(),
            };
        }

        let lowered = trimmed.to_ascii_lowercase();
        let mut scored: Vec<Scored> = self
            .manager
            .scoring_snapshot()
            .into_iter()
            .filter(|(profile, _)| profile.id != GENERAL_PROFILE)
            .map(|(profile, patterns)| score_profile(&lowered, trimmed, work_context, &profile, &patterns))
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.profile_id.cmp(&b.profile_id))
        });

        let Some(best) = scored.first() else {
            return Classification {
                profile_id: GENERAL_PROFILE.to_string(),
                confidence: 0.5,
                reasoning: "No candidate profiles, using general profile".to_string(),
                alternatives: Vec::new(),
            };
        };

        if best.score < self.threshold {
            let reasoning = format!(
                "Best match '{}' scored {:.2}, below threshold {:.2}; using general profile",
                best.profile_id, best.score, self.threshold
            );
            let alternatives = alternatives(&scored, None);
            return Classification {
                profile_id: GENERAL_PROFILE.to_string(),
                confidence: best.score,
                reasoning,
                alternatives,
            };
        }

        let reasoning = format!(
            "Matched {} keywords, {} patterns, {} context rules for profile '{}'",
            best.matched_keywords, best.matched_patterns, best.matched_rules, best.profile_id
        );
        Classification {
            profile_id: best.profile_id.clone(),
            confidence: best.score,
            reasoning,
            alternatives: alternatives(&scored, Some(&best.profile_id)),
        }
    }
}

fn alternatives(scored: &[Scored], winner: Option<&str>) -> Vec<ProfileAlternative> {
    scored
        .iter()
        .filter(|s| Some(s.profile_id.as_str()) != winner)
        .take(3)
        .map(|s| ProfileAlternative {
            profile_id: s.profile_id.clone(),
            score: s.score,
        })
        .collect()
}

fn score_profile(
    lowered_query: &str,
    raw_query: &str,
    work_context: &WorkContext,
    profile: &crate::profile::AgentProfile,
    patterns: &[Regex],
) -> Scored {
    let matched_keywords = profile
        .keywords
        .iter()
        .filter(|kw| lowered_query.contains(kw.as_str()))
        .count();
    let keyword_score = ratio(matched_keywords, profile.keywords.len());

    let matched_patterns = patterns.iter().filter(|re| re.is_match(raw_query)).count();
    let regex_score = ratio(matched_patterns, patterns.len());

    let attributes = work_context.attributes();
    let matched_rules = profile
        .context_rules
        .iter()
        .filter(|(key, accepted)| {
            attributes
                .get(*key)
                .is_some_and(|value| accepted.iter().any(|needle| value.contains(needle)))
        })
        .count();
    let context_score = ratio(matched_rules, profile.context_rules.len());

    let blended = 0.4 * keyword_score + 0.4 * regex_score + 0.2 * context_score;
    Scored {
        profile_id: profile.id.clone(),
        score: (blended * profile.weight).clamp(0.0, 1.0),
        matched_keywords,
        matched_patterns,
        matched_rules,
    }
}

fn ratio(matched: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        matched as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classifier() -> Classifier {
        Classifier::new(Arc::new(ProfileManager::new()))
    }

    #[test]
    fn empty_query_falls_back_to_general() {
        let result = classifier().classify("", &WorkContext::default());
        assert_eq!(result.profile_id, "general");
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.reasoning, "Empty query, using general profile");
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn low_scores_fall_back_with_best_as_top_alternative() {
        let result = classifier().classify("weather in lisbon", &WorkContext::default());
        assert_eq!(result.profile_id, "general");
        assert!(result.confidence < DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(result.alternatives.len() <= 3);
    }

    #[test]
    fn debugging_query_with_context_classifies_above_threshold() {
        let classifier = classifier().with_threshold(0.3);
        let mut ctx = WorkContext::default();
        ctx.session.insert("mode".into(), "debug".into());
        ctx.open_tickets = vec!["BUG-1201".into()];

        let result = classifier.classify(
            "error: panicked at worker crash, stack trace attached, failing bug",
            &ctx,
        );
        assert_eq!(result.profile_id, "debugging");
        assert!(result.confidence >= 0.3);
        assert!(result.reasoning.contains("debugging"));
        assert!(!result.alternatives.is_empty());
        assert!(result
            .alternatives
            .iter()
            .all(|alt| alt.profile_id != "debugging"));
    }

    #[test]
    fn alternatives_are_ranked_and_capped_at_three() {
        let classifier = classifier().with_threshold(0.01);
        let result = classifier.classify(
            "error in auth token implementation docs architecture",
            &WorkContext::default(),
        );
        assert!(result.alternatives.len() <= 3);
        for pair in result.alternatives.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

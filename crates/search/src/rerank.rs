use conexus_store::{tokenize, SearchResult};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Rescoring pass over the fused candidate list.
///
/// Implementations receive at most 2·limit candidates and may filter or
/// reorder them; returned scores must be monotonic and stay in [0, 1].
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult>;
}

/// Baseline lexical reranker: exact-phrase match adds a bounded bonus,
/// term-overlap ratio contributes proportionally.
#[derive(Debug, Clone)]
pub struct LexicalReranker {
    /// Added once when the whole query appears verbatim in the content.
    pub phrase_bonus: f32,
    /// Weight of the term-overlap ratio.
    pub overlap_weight: f32,
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self {
            phrase_bonus: 0.2,
            overlap_weight: 0.8,
        }
    }
}

impl Reranker for LexicalReranker {
    fn rerank(&self, query: &str, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        let phrase = query.trim().to_ascii_lowercase();
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return candidates;
        }

        let mut reranked: Vec<SearchResult> = candidates
            .into_iter()
            .map(|mut result| {
                let content = result.document.content.to_ascii_lowercase();
                let doc_terms: HashSet<String> =
                    tokenize(&result.document.content).into_iter().collect();

                let overlap = query_terms.intersection(&doc_terms).count() as f32
                    / query_terms.len() as f32;
                let mut score = overlap * self.overlap_weight;
                if !phrase.is_empty() && content.contains(&phrase) {
                    score += self.phrase_bonus;
                }
                result.score = score.clamp(0.0, 1.0);
                result
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        reranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conexus_store::Document;

    fn candidate(id: &str, content: &str, score: f32) -> SearchResult {
        SearchResult::sparse(Document::new(id, content, vec![]), score)
    }

    #[test]
    fn phrase_match_outranks_partial_overlap() {
        let reranker = LexicalReranker::default();
        let reranked = reranker.rerank(
            "token bucket",
            vec![
                candidate("partial", "a bucket of tokens, sort of", 0.9),
                candidate("exact", "the token bucket refills per second", 0.1),
            ],
        );
        assert_eq!(reranked[0].document.id, "exact");
        assert!(reranked[0].score > reranked[1].score);
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let reranker = LexicalReranker {
            phrase_bonus: 0.9,
            overlap_weight: 0.9,
        };
        let reranked = reranker.rerank(
            "retry backoff",
            vec![candidate("a", "retry backoff retry backoff", 0.5)],
        );
        assert!(reranked[0].score <= 1.0);
        assert!(reranked[0].score >= 0.0);
    }

    #[test]
    fn empty_query_keeps_candidates_untouched() {
        let reranker = LexicalReranker::default();
        let reranked = reranker.rerank("", vec![candidate("a", "anything", 0.4)]);
        assert_eq!(reranked.len(), 1);
        assert!((reranked[0].score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn no_overlap_scores_zero() {
        let reranker = LexicalReranker::default();
        let reranked = reranker.rerank("kafka consumer", vec![candidate("a", "http router", 0.8)]);
        assert_eq!(reranked[0].score, 0.0);
    }
}

use conexus_store::SearchResult;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Fusion parameters. `rrf_k` follows the usual k=60; `weighted_alpha` is
/// the sparse share in weighted mode.
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub rrf_k: f32,
    pub weighted_alpha: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            weighted_alpha: 0.3,
        }
    }
}

struct Fused {
    result: SearchResult,
    score: f32,
}

/// Reciprocal Rank Fusion: each list contributes `1/(k + rank)` per document
/// (1-based ranks), summed across lists. Ties break by sparse score
/// descending, then document ID ascending, so output order is deterministic.
#[must_use]
pub fn fuse_rrf(
    sparse: Vec<SearchResult>,
    dense: Vec<SearchResult>,
    config: &FusionConfig,
) -> Vec<SearchResult> {
    let mut fused: HashMap<String, Fused> = HashMap::new();

    for (rank, result) in sparse.into_iter().enumerate() {
        let contribution = 1.0 / (config.rrf_k + rank as f32 + 1.0);
        merge(&mut fused, result, contribution);
    }
    for (rank, result) in dense.into_iter().enumerate() {
        let contribution = 1.0 / (config.rrf_k + rank as f32 + 1.0);
        merge(&mut fused, result, contribution);
    }

    finish(fused)
}

/// Weighted fusion: min-max normalise scores within each list, then
/// `final = α·sparse_norm + (1−α)·dense_norm`. Same tie-break as RRF.
#[must_use]
pub fn fuse_weighted(
    sparse: Vec<SearchResult>,
    dense: Vec<SearchResult>,
    config: &FusionConfig,
) -> Vec<SearchResult> {
    let alpha = config.weighted_alpha.clamp(0.0, 1.0);
    let sparse_norms = normalise(&sparse);
    let dense_norms = normalise(&dense);

    let mut fused: HashMap<String, Fused> = HashMap::new();
    for (result, norm) in sparse.into_iter().zip(sparse_norms) {
        merge(&mut fused, result, alpha * norm);
    }
    for (result, norm) in dense.into_iter().zip(dense_norms) {
        merge(&mut fused, result, (1.0 - alpha) * norm);
    }

    finish(fused)
}

fn merge(fused: &mut HashMap<String, Fused>, result: SearchResult, contribution: f32) {
    match fused.get_mut(&result.document.id) {
        Some(entry) => {
            if entry.result.sparse_score.is_none() {
                entry.result.sparse_score = result.sparse_score;
            }
            if entry.result.dense_score.is_none() {
                entry.result.dense_score = result.dense_score;
            }
            entry.score += contribution;
        }
        None => {
            fused.insert(
                result.document.id.clone(),
                Fused {
                    result,
                    score: contribution,
                },
            );
        }
    }
}

fn finish(fused: HashMap<String, Fused>) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = fused
        .into_values()
        .map(|entry| {
            let mut result = entry.result;
            result.score = entry.score;
            result
        })
        .collect();
    merged.sort_by(compare_results);
    merged
}

fn compare_results(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let a_sparse = a.sparse_score.unwrap_or(0.0);
            let b_sparse = b.sparse_score.unwrap_or(0.0);
            b_sparse.partial_cmp(&a_sparse).unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.document.id.cmp(&b.document.id))
}

/// Min-max normalise a list's scores into [0, 1]. A constant list (or a
/// single result) normalises to 1.0 so it still contributes fully.
fn normalise(results: &[SearchResult]) -> Vec<f32> {
    let min = results.iter().map(|r| r.score).fold(f32::INFINITY, f32::min);
    let max = results
        .iter()
        .map(|r| r.score)
        .fold(f32::NEG_INFINITY, f32::max);
    results
        .iter()
        .map(|r| {
            if max > min {
                (r.score - min) / (max - min)
            } else {
                1.0
            }
        })
        .collect()
}

use crate::error::Result;
use crate::types::{Document, SearchOptions, SearchResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// Uniform operations over the vector backend.
///
/// Implementations must return results sorted by descending score, already
/// filtered by `SearchOptions` (limit, threshold, metadata filters), and must
/// reject vectors whose length differs from [`expected_dimension`].
///
/// [`expected_dimension`]: VectorBackend::expected_dimension
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Dimension every stored and queried vector must have.
    fn expected_dimension(&self) -> usize;

    async fn upsert(&self, doc: Document) -> Result<()>;

    async fn upsert_batch(&self, docs: Vec<Document>) -> Result<()> {
        for doc in docs {
            self.upsert(doc).await?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// Returns `true` when a document was present and removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Dense search: cosine similarity against the query vector.
    async fn search_vector(&self, vector: &[f32], opts: &SearchOptions)
        -> Result<Vec<SearchResult>>;

    /// Sparse search: BM25 over tokenised document content, scores
    /// normalised into [0, 1] within the result set.
    async fn search_bm25(&self, text: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>>;

    /// Backend-native hybrid search. The default blends the two arms with
    /// reciprocal-rank fusion (k = 60); backends with a native hybrid mode
    /// override this. The search pipeline does its own fusion and calls the
    /// individual arms instead.
    async fn search_hybrid(
        &self,
        text: &str,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        const RRF_K: f32 = 60.0;

        let sparse = self.search_bm25(text, opts).await?;
        let dense = self.search_vector(vector, opts).await?;

        let mut fused: HashMap<String, (SearchResult, f32)> = HashMap::new();
        for (rank, result) in sparse.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused.insert(result.document.id.clone(), (result, contribution));
        }
        for (rank, result) in dense.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(result.document.id.clone())
                .and_modify(|(existing, score)| {
                    existing.dense_score = result.dense_score;
                    *score += contribution;
                })
                .or_insert((result, contribution));
        }

        let mut merged: Vec<SearchResult> = fused
            .into_values()
            .map(|(mut result, score)| {
                result.score = score;
                result
            })
            .collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        merged.truncate(opts.limit);
        Ok(merged)
    }

    async fn count(&self) -> Result<usize>;

    /// Distinct `path` metadata values across the store, sorted.
    async fn list_indexed_files(&self) -> Result<Vec<String>>;

    /// All documents chunked from one path, in ID order.
    async fn file_chunks(&self, path: &str) -> Result<Vec<Document>>;
}

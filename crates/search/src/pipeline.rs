use crate::error::{Result, SearchError};
use crate::fusion::{fuse_rrf, fuse_weighted, FusionConfig};
use crate::query::{HybridMode, Query};
use crate::rerank::Reranker;
use conexus_store::{Embedder, SearchOptions, SearchResult, VectorBackend};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fusion: FusionConfig,
    /// Upper bound on concurrent embed + store calls across requests.
    pub max_concurrency: usize,
    pub default_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            max_concurrency: 8,
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrates one query: embed, run the sparse and dense arms in
/// parallel, fuse, optionally rerank, trim. Cancellation aborts promptly
/// and never yields partial results.
pub struct SearchPipeline {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn VectorBackend>,
    reranker: Option<Arc<dyn Reranker>>,
    config: PipelineConfig,
    semaphore: Arc<Semaphore>,
}

impl SearchPipeline {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn VectorBackend>,
        reranker: Option<Arc<dyn Reranker>>,
        config: PipelineConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            embedder,
            backend,
            reranker,
            config,
            semaphore,
        }
    }

    pub async fn run(&self, query: &Query, cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
        self.run_with(query, cancel, None, None).await
    }

    /// Run with a per-call deadline and fusion override (both fall back to
    /// the pipeline defaults). Used by handlers to honour profile budgets.
    pub async fn run_with(
        &self,
        query: &Query,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        fusion: Option<FusionConfig>,
    ) -> Result<Vec<SearchResult>> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        let deadline = timeout.unwrap_or(self.config.default_timeout);
        let fusion = fusion.unwrap_or(self.config.fusion);

        let work = self.execute(query, &fusion);
        tokio::select! {
            // Dropping `work` abandons whatever sub-operation is in flight.
            () = cancel.cancelled() => Err(SearchError::Cancelled),
            outcome = tokio::time::timeout(deadline, work) => match outcome {
                Err(_) => Err(SearchError::Timeout),
                Ok(result) => result,
            },
        }
    }

    async fn execute(&self, query: &Query, fusion: &FusionConfig) -> Result<Vec<SearchResult>> {
        // Back-pressure: queue, never drop, when the bound is reached.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SearchError::Cancelled)?;

        // Overshoot so the reranker has headroom to filter.
        let opts = SearchOptions {
            limit: query.limit.saturating_mul(2),
            threshold: query.threshold,
            filters: query.filters.clone(),
        };

        let mut fused = match query.hybrid_mode {
            HybridMode::Sparse => self.backend.search_bm25(&query.text, &opts).await?,
            HybridMode::Dense => {
                let vector = self.embedder.embed(&query.text).await?;
                self.backend.search_vector(&vector, &opts).await?
            }
            HybridMode::Rrf | HybridMode::Weighted => {
                let vector = self.embedder.embed(&query.text).await?;
                let (sparse, dense) = tokio::try_join!(
                    self.backend.search_bm25(&query.text, &opts),
                    self.backend.search_vector(&vector, &opts),
                )?;
                log::debug!(
                    "hybrid arms: {} sparse, {} dense for '{}'",
                    sparse.len(),
                    dense.len(),
                    query.text
                );
                match query.hybrid_mode {
                    HybridMode::Rrf => fuse_rrf(sparse, dense, fusion),
                    _ => fuse_weighted(sparse, dense, fusion),
                }
            }
        };

        if let Some(reranker) = &self.reranker {
            fused.truncate(query.limit.saturating_mul(2));
            let positions: HashMap<String, usize> = fused
                .iter()
                .enumerate()
                .map(|(idx, result)| (result.document.id.clone(), idx))
                .collect();
            let mut reranked = reranker.rerank(&query.text, fused);
            for result in &mut reranked {
                result.reranked_from = positions.get(&result.document.id).copied();
            }
            fused = reranked;
        }

        fused.retain(|result| result.score >= query.threshold);
        fused.truncate(query.limit);
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rerank::LexicalReranker;
    use conexus_store::{Document, HashEmbedder, MemoryBackend};

    async fn seeded_backend(embedder: &HashEmbedder) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(embedder.dimensions()));
        let corpus = [
            ("d1", "token bucket rate limiter with refill interval"),
            ("d2", "federation cache invalidation by connector fingerprint"),
            ("d3", "hybrid search pipeline fusing sparse and dense results"),
            ("d4", "oauth callback state validation"),
        ];
        for (id, content) in corpus {
            let vector = embedder.embed(content).await.unwrap();
            backend
                .upsert(Document::new(id, content, vector).with_metadata("path", format!("{id}.rs")))
                .await
                .unwrap();
        }
        backend
    }

    fn pipeline(
        embedder: HashEmbedder,
        backend: Arc<MemoryBackend>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> SearchPipeline {
        SearchPipeline::new(Arc::new(embedder), backend, reranker, PipelineConfig::default())
    }

    #[tokio::test]
    async fn hybrid_query_returns_fused_results() {
        let embedder = HashEmbedder::new(64);
        let backend = seeded_backend(&embedder).await;
        let pipeline = pipeline(embedder, backend, None);

        let query = Query::new("rate limiter refill", 2);
        let results = pipeline.run(&query, &CancellationToken::new()).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        assert_eq!(results[0].document.id, "d1");
    }

    #[tokio::test]
    async fn reranker_records_pre_rerank_positions() {
        let embedder = HashEmbedder::new(64);
        let backend = seeded_backend(&embedder).await;
        let pipeline = pipeline(
            embedder,
            backend,
            Some(Arc::new(LexicalReranker::default()) as Arc<dyn Reranker>),
        );

        let query = Query::new("cache invalidation fingerprint", 3);
        let results = pipeline.run(&query, &CancellationToken::new()).await.unwrap();
        assert!(!results.is_empty());
        for result in &results {
            assert!(result.reranked_from.is_some());
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_without_results() {
        let embedder = HashEmbedder::new(64);
        let backend = seeded_backend(&embedder).await;
        let pipeline = pipeline(embedder, backend, None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline
            .run(&Query::new("anything", 2), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }

    #[tokio::test]
    async fn sparse_mode_bypasses_fusion() {
        let embedder = HashEmbedder::new(64);
        let backend = seeded_backend(&embedder).await;
        let pipeline = pipeline(embedder, backend, None);

        let query = Query::new("oauth state", 4).with_mode(HybridMode::Sparse);
        let results = pipeline.run(&query, &CancellationToken::new()).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].document.id, "d4");
        for result in &results {
            assert!(result.sparse_score.is_some());
            assert!(result.dense_score.is_none());
        }
    }

    #[tokio::test]
    async fn threshold_drops_weak_results() {
        let embedder = HashEmbedder::new(64);
        let backend = seeded_backend(&embedder).await;
        let pipeline = pipeline(
            embedder,
            backend,
            Some(Arc::new(LexicalReranker::default()) as Arc<dyn Reranker>),
        );

        let query = Query::new("token bucket rate limiter", 4).with_threshold(0.5);
        let results = pipeline.run(&query, &CancellationToken::new()).await.unwrap();
        for result in &results {
            assert!(result.score >= 0.5);
        }
    }
}

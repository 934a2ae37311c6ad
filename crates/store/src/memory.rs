use crate::backend::VectorBackend;
use crate::error::{Result, StoreError};
use crate::types::{match_filters, tokenize, unix_ms, Document, SearchOptions, SearchResult};
use async_trait::async_trait;
use ndarray::ArrayView1;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// In-memory reference backend: exact cosine similarity for the dense arm
/// and an incrementally maintained BM25 index for the sparse arm.
pub struct MemoryBackend {
    dimension: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    // BM25 bookkeeping, kept in step with `docs` on every upsert/delete.
    term_freqs: HashMap<String, HashMap<String, f32>>,
    doc_lens: HashMap<String, f32>,
    doc_freq: HashMap<String, usize>,
    total_len: f32,
}

impl Inner {
    fn remove_doc_terms(&mut self, id: &str) {
        let Some(freqs) = self.term_freqs.remove(id) else {
            return;
        };
        for term in freqs.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        if let Some(len) = self.doc_lens.remove(id) {
            self.total_len -= len;
        }
    }

    fn index_doc_terms(&mut self, id: &str, content: &str) {
        let tokens = tokenize(content);
        let len = tokens.len() as f32;
        let mut freqs: HashMap<String, f32> = HashMap::new();
        for token in tokens {
            *freqs.entry(token).or_insert(0.0) += 1.0;
        }
        for term in freqs.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.doc_lens.insert(id.to_string(), len);
        self.total_len += len;
        self.term_freqs.insert(id.to_string(), freqs);
    }

    fn avg_len(&self) -> f32 {
        let count = self.doc_lens.len().max(1) as f32;
        (self.total_len / count).max(1e-3)
    }

    fn bm25_score(&self, id: &str, query_terms: &[String]) -> f32 {
        let Some(freqs) = self.term_freqs.get(id) else {
            return 0.0;
        };
        let dl = self.doc_lens.get(id).copied().unwrap_or(0.0);
        if dl <= 0.0 {
            return 0.0;
        }
        let total_docs = self.doc_lens.len().max(1) as f32;
        let avg_len = self.avg_len();

        let mut score = 0.0;
        for term in query_terms {
            let freq = freqs.get(term).copied().unwrap_or(0.0);
            if freq <= 0.0 {
                continue;
            }
            let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
            let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = freq + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avg_len);
            if denom > 0.0 {
                score += idf * (freq * (BM25_K1 + 1.0)) / denom;
            }
        }
        score
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let dot = a.dot(&b);
    let norm = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if norm > 0.0 {
        dot / norm
    } else {
        0.0
    }
}

fn sort_and_trim(mut results: Vec<SearchResult>, opts: &SearchOptions) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
    results.retain(|r| r.score >= opts.threshold);
    results.truncate(opts.limit);
    results
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn expected_dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, mut doc: Document) -> Result<()> {
        self.check_dimension(&doc.vector)?;
        let mut inner = self.write();
        if let Some(existing) = inner.docs.get(&doc.id) {
            // Vectors are immutable per stored generation; a replace keeps
            // the original creation instant.
            doc.created_at = existing.created_at;
            doc.updated_at = unix_ms();
        }
        inner.remove_doc_terms(&doc.id);
        inner.index_doc_terms(&doc.id, &doc.content);
        inner.docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn upsert_batch(&self, docs: Vec<Document>) -> Result<()> {
        for doc in &docs {
            self.check_dimension(&doc.vector)?;
        }
        for doc in docs {
            self.upsert(doc).await?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read().docs.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.write();
        inner.remove_doc_terms(id);
        Ok(inner.docs.remove(id).is_some())
    }

    async fn search_vector(
        &self,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.check_dimension(vector)?;
        let inner = self.read();
        let results = inner
            .docs
            .values()
            .filter(|doc| match_filters(&doc.metadata, &opts.filters))
            .map(|doc| SearchResult::dense(doc.clone(), cosine(vector, &doc.vector)))
            .collect();
        Ok(sort_and_trim(results, opts))
    }

    async fn search_bm25(&self, text: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let query_terms = tokenize(text);
        let inner = self.read();
        let mut scored: Vec<(String, f32)> = inner
            .docs
            .values()
            .filter(|doc| match_filters(&doc.metadata, &opts.filters))
            .map(|doc| (doc.id.clone(), inner.bm25_score(&doc.id, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        // Raw BM25 is unbounded; normalise into [0, 1] so the caller's
        // threshold and the fusion layer see comparable numbers.
        let max = scored
            .iter()
            .map(|(_, s)| *s)
            .fold(0.0f32, f32::max)
            .max(1e-6);
        for (_, score) in &mut scored {
            *score /= max;
        }

        let results = scored
            .into_iter()
            .filter_map(|(id, score)| {
                inner
                    .docs
                    .get(&id)
                    .map(|doc| SearchResult::sparse(doc.clone(), score))
            })
            .collect();
        Ok(sort_and_trim(results, opts))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read().docs.len())
    }

    async fn list_indexed_files(&self) -> Result<Vec<String>> {
        let inner = self.read();
        let paths: BTreeSet<String> = inner
            .docs
            .values()
            .filter_map(|doc| doc.path().map(str::to_string))
            .collect();
        Ok(paths.into_iter().collect())
    }

    async fn file_chunks(&self, path: &str) -> Result<Vec<Document>> {
        let inner = self.read();
        let mut chunks: Vec<Document> = inner
            .docs
            .values()
            .filter(|doc| doc.path() == Some(path))
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(chunks)
    }
}

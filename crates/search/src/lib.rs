//! # Conexus Search
//!
//! Hybrid retrieval: dense vector similarity fused with sparse BM25 results,
//! optionally reranked, biased by the caller's work context.
//!
//! ```text
//! Query
//!   ├─> Dense  - embed + cosine search          (concurrent)
//!   ├─> Sparse - BM25 over indexed content      (concurrent)
//!   └─> Fusion - RRF (k=60) or weighted (α=0.3)
//!         └─> Lexical rerank + trim to limit
//! ```

mod classifier;
mod error;
mod fusion;
mod pipeline;
mod profile;
mod query;
mod rerank;

pub use classifier::{Classification, Classifier, ProfileAlternative, DEFAULT_CONFIDENCE_THRESHOLD};
pub use error::{Result, SearchError};
pub use fusion::{fuse_rrf, fuse_weighted, FusionConfig};
pub use pipeline::{PipelineConfig, SearchPipeline};
pub use profile::{
    AgentProfile, ChunkStrategy, ChunkingStrategy, ContextWindow, ProfileManager, RankingWeights,
    BUILTIN_PROFILES,
};
pub use query::{HybridMode, Query, WorkContext};
pub use rerank::{LexicalReranker, Reranker};

// Re-export for convenience
pub use conexus_store::SearchResult;

//! # Conexus Store
//!
//! Uniform adapter over the vector backend: upsert, dense (cosine) search,
//! sparse (BM25) search, and filtered lookup. The concrete vector database
//! lives behind [`VectorBackend`]; [`MemoryBackend`] is the in-process
//! reference implementation used by tests and single-node deployments.

mod backend;
mod embedder;
mod error;
mod memory;
mod types;

pub use backend::VectorBackend;
pub use embedder::{Embedder, HashEmbedder};
pub use error::{Result, StoreError};
pub use memory::MemoryBackend;
pub use types::{match_filters, tokenize, Document, Filters, SearchOptions, SearchResult};

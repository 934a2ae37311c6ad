//! # Conexus Cache
//!
//! The caching tier: a federation cache for fully-assembled search
//! responses (invalidated when the connector configuration changes), a
//! per-agent result cache, the session store, and optional JSON
//! persistence with strict base-directory containment.

mod error;
mod federation;
mod keys;
mod persist;
mod result_cache;
mod session;

pub use error::{CacheError, Result};
pub use federation::{
    CacheLookup, CacheStats, FederationCache, FederationConfig, Metadata, PersistedEntry,
};
pub use keys::{connector_fingerprint, content_hash, generate_key, result_key};
pub use persist::PersistentStore;
pub use result_cache::{ResultCache, ResultCacheConfig, ResultCacheStats, ResultMetadata};
pub use session::{HistoryEntry, Session, SessionManager};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("vector store error: {0}")]
    Store(#[from] conexus_store::StoreError),

    #[error("search cancelled")]
    Cancelled,

    #[error("search timed out")]
    Timeout,

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("built-in profile '{0}' cannot be removed")]
    BuiltinProfile(String),

    #[error("invalid pattern in profile '{profile}': {source}")]
    InvalidPattern {
        profile: String,
        #[source]
        source: regex::Error,
    },
}

impl SearchError {
    /// Dependency failures (store, embedder) are safe to retry for
    /// idempotent operations; everything else is not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout)
    }
}

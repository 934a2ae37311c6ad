use conexus_protocol::{RpcError, CANCELLED, DEPENDENCY_FAILED, RATE_LIMITED};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Server-side error taxonomy. Each variant maps onto a stable JSON-RPC
/// code; internals never leak stack traces or secrets to clients.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Validation(String),

    #[error("dependency failed: {message}")]
    Dependency { message: String, retryable: bool },

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn dependency(message: impl Into<String>, retryable: bool) -> Self {
        Self::Dependency {
            message: message.into(),
            retryable,
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dependency { retryable: true, .. })
    }

    /// Lossless mapping onto the wire error. Validation failures are
    /// `-32602`, never `-32603`.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Protocol(detail) => RpcError::invalid_request(detail.clone()),
            Self::Validation(detail) => RpcError::invalid_params(detail.clone()),
            Self::Dependency { message, retryable } => {
                RpcError::new(DEPENDENCY_FAILED, format!("Dependency failed: {message}"))
                    .with_data(json!({ "retryable": retryable }))
            }
            Self::RateLimited { retry_after_secs } => {
                RpcError::new(RATE_LIMITED, "Too many requests")
                    .with_data(json!({ "retry_after": retry_after_secs }))
            }
            Self::Cancelled => RpcError::new(CANCELLED, "Request cancelled"),
            Self::Internal(detail) => {
                log::error!("internal error surfaced to client: {detail}");
                RpcError::internal("unexpected server error")
            }
        }
    }
}

impl From<conexus_search::SearchError> for ServerError {
    fn from(err: conexus_search::SearchError) -> Self {
        use conexus_search::SearchError;
        match err {
            SearchError::Cancelled => Self::Cancelled,
            SearchError::Timeout => Self::Dependency {
                message: "search timed out".to_string(),
                retryable: true,
            },
            SearchError::Store(inner) => Self::Dependency {
                message: inner.to_string(),
                retryable: true,
            },
            SearchError::InvalidProfile(_)
            | SearchError::ProfileNotFound(_)
            | SearchError::BuiltinProfile(_)
            | SearchError::InvalidPattern { .. } => Self::Validation(err.to_string()),
        }
    }
}

impl From<conexus_store::StoreError> for ServerError {
    fn from(err: conexus_store::StoreError) -> Self {
        match &err {
            conexus_store::StoreError::DimensionMismatch { .. } => {
                Self::Validation(err.to_string())
            }
            _ => Self::Dependency {
                message: err.to_string(),
                retryable: true,
            },
        }
    }
}

impl From<conexus_cache::CacheError> for ServerError {
    fn from(err: conexus_cache::CacheError) -> Self {
        use conexus_cache::CacheError;
        match &err {
            CacheError::PathEscape(_) | CacheError::InvalidSessionId(_) => {
                Self::Validation(err.to_string())
            }
            CacheError::SessionNotFound(_) => Self::Validation(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<conexus_registry::RegistryError> for ServerError {
    fn from(err: conexus_registry::RegistryError) -> Self {
        use conexus_registry::RegistryError;
        match &err {
            RegistryError::TestFailed(message) => Self::Dependency {
                message: message.clone(),
                retryable: false,
            },
            _ => Self::Validation(err.to_string()),
        }
    }
}

impl From<conexus_analyzer::AnalyzerError> for ServerError {
    fn from(err: conexus_analyzer::AnalyzerError) -> Self {
        use conexus_analyzer::AnalyzerError;
        match &err {
            AnalyzerError::Io(_) => Self::Dependency {
                message: err.to_string(),
                retryable: true,
            },
            _ => Self::Validation(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conexus_protocol::{INVALID_PARAMS, INTERNAL_ERROR};

    #[test]
    fn validation_maps_to_invalid_params() {
        let err = ServerError::validation("top_k out of range");
        assert_eq!(err.to_rpc_error().code, INVALID_PARAMS);
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = ServerError::Internal("lock poisoned at state.rs:42".to_string());
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, INTERNAL_ERROR);
        assert!(!rpc.message.contains("state.rs"));
    }

    #[test]
    fn dependency_carries_retryable_hint() {
        let rpc = ServerError::dependency("embedder unreachable", true).to_rpc_error();
        assert_eq!(rpc.code, DEPENDENCY_FAILED);
        assert_eq!(rpc.data.unwrap()["retryable"], serde_json::json!(true));
    }
}

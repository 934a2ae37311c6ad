use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid tool name '{0}': expected dotted lowercase form like 'context.search'")]
    InvalidToolName(String),

    #[error("invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("path {0} is outside the workspace root")]
    PathEscape(PathBuf),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid glob pattern: {0}")]
    InvalidGlob(#[from] globset::Error),

    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("file too large: {path} ({size} bytes)")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

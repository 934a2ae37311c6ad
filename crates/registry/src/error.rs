use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("connector '{0}' already exists")]
    DuplicateConnector(String),

    #[error("connector not found: {0}")]
    ConnectorNotFound(String),

    #[error("invalid connector: {0}")]
    InvalidConnector(String),

    #[error("connector test failed: {0}")]
    TestFailed(String),
}

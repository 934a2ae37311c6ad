use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of external data source a connector ingests from. Closed sum type;
/// per-kind tool suites key off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorType {
    CodeHost,
    Chat,
    Ticket,
    Docs,
}

impl ConnectorType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeHost => "code-host",
            Self::Chat => "chat",
            Self::Ticket => "ticket",
            Self::Docs => "docs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Active,
    Error,
    Disabled,
}

/// Declarative connector instance as configured by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectorType,
    #[serde(default)]
    pub config: Value,
}

/// Row returned by `context.connector_management list`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectorType,
    pub status: ConnectorStatus,
}

/// Probe used by the registry's `test` operation. The concrete connector
/// implementations live outside this crate; deployments inject a tester
/// that actually reaches the external system.
#[async_trait]
pub trait ConnectorTester: Send + Sync {
    /// Errors carry the underlying failure verbatim.
    async fn test(&self, config: &ConnectorConfig) -> std::result::Result<(), String>;
}

/// Accepts every connector; the default when no tester is wired up.
pub struct NoopTester;

#[async_trait]
impl ConnectorTester for NoopTester {
    async fn test(&self, _config: &ConnectorConfig) -> std::result::Result<(), String> {
        Ok(())
    }
}

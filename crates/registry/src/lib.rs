//! # Conexus Registry
//!
//! Tracks the active external data connectors, emits configuration
//! fingerprints, and fans a single change event out to the federation
//! cache and the tool registry. Also owns the OAuth code-flow state used
//! to authorise connectors.

mod connector;
mod error;
mod oauth;
mod registry;

pub use connector::{ConnectorConfig, ConnectorStatus, ConnectorSummary, ConnectorTester, ConnectorType, NoopTester};
pub use error::{RegistryError, Result};
pub use oauth::{OAuthError, OAuthFlow, OAuthProvider, OAuthToken, StateStore, TokenExchanger};
pub use registry::{ChangeKind, ConnectorChange, ConnectorRegistry};

//! JSON-RPC 2.0 message model shared by the dispatcher and tool handlers.
//!
//! Request IDs are normalised on ingest so that responses echo them
//! byte-for-byte: clients that send `"id": 3` must never receive `"id": 3.0`
//! back.

mod error;
mod rpc;
mod tool_name;

pub use error::{ProtocolError, Result};
pub use rpc::{
    JsonRpcRequest, JsonRpcResponse, Notification, RequestId, RpcError, CANCELLED, DEPENDENCY_FAILED,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
    RATE_LIMITED,
};
pub use tool_name::validate_tool_name;

/// MCP method names handled by the dispatcher.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const NOTIFY_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
}

use serde::Serialize;

/// Descriptor advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Round a relevance score to the fixed serialisation precision (4 decimal
/// places). Keeps response payloads byte-stable across platforms.
#[must_use]
pub fn round_score(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::round_score;

    #[test]
    fn score_rounding_is_stable() {
        assert_eq!(round_score(0.123_456), 0.1235);
        assert_eq!(round_score(1.0), 1.0);
        assert_eq!(round_score(0.0), 0.0);
    }
}

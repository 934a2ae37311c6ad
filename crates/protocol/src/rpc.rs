use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// JSON-RPC 2.0 reserved codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Implementation-defined domain codes (server range -32000..-32099).
pub const DEPENDENCY_FAILED: i64 = -32000;
pub const RATE_LIMITED: i64 = -32001;
pub const CANCELLED: i64 = -32002;

/// JSON-RPC request identifier.
///
/// Numeric IDs that arrive as whole floats (`3.0`) are normalised to
/// integers so the response ID matches the request ID where clients expect
/// integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl RequestId {
    #[must_use]
    pub fn number(n: i64) -> Self {
        Self::Number(n)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(Self::Null),
            Value::String(s) => Ok(Self::String(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Number(i));
                }
                if let Some(f) = n.as_f64() {
                    // Whole floats round-trip as integers; fractional IDs are
                    // not valid JSON-RPC identifiers for this server.
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        return Ok(Self::Number(f as i64));
                    }
                }
                Err(de::Error::custom("request id must be an integer, string, or null"))
            }
            other => Err(de::Error::custom(format!(
                "request id must be an integer, string, or null (got {other})"
            ))),
        }
    }
}

/// Inbound JSON-RPC request or notification (`id` absent).
///
/// An explicit `"id": null` is a request with a null ID, not a
/// notification; the custom deserialiser keeps the two apart.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "present_id")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

fn present_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RequestId>, D::Error> {
    RequestId::deserialize(deserializer).map(Some)
}

impl JsonRpcRequest {
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Version check per JSON-RPC 2.0: anything but exactly "2.0" is an
    /// invalid request.
    #[must_use]
    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    #[must_use]
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid request: {}", detail.into()))
    }

    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", detail.into()))
    }

    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, format!("Internal error: {}", detail.into()))
    }
}

/// Outbound JSON-RPC response. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// The single error emitted after a stdio parse failure: null ID, then
    /// the read loop halts.
    #[must_use]
    pub fn parse_failure() -> Self {
        Self::error(RequestId::Null, RpcError::parse_error())
    }
}

/// Server-initiated notification (no ID).
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn whole_float_ids_normalise_to_integers() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3.0,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Number(3)));

        let response = JsonRpcResponse::ok(req.id.unwrap(), serde_json::json!({}));
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(encoded.contains(r#""id":3"#), "got {encoded}");
        assert!(!encoded.contains("3.0"));
    }

    #[test]
    fn string_and_null_ids_round_trip() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::String("abc".into())));

        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Null));
    }

    #[test]
    fn fractional_ids_are_rejected() {
        let result = serde_json::from_str::<JsonRpcRequest>(
            r#"{"jsonrpc":"2.0","id":3.5,"method":"ping"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_id_is_a_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn parse_failure_response_has_null_id() {
        let encoded = serde_json::to_string(&JsonRpcResponse::parse_failure()).unwrap();
        assert!(encoded.contains(r#""id":null"#));
        assert!(encoded.contains("-32700"));
    }

    #[test]
    fn error_skips_absent_data() {
        let err = RpcError::invalid_params("top_k out of range");
        let encoded = serde_json::to_string(&err).unwrap();
        assert!(!encoded.contains("data"));
        assert_eq!(err.code, INVALID_PARAMS);
    }
}

// JSON-RPC 2.0 envelopes for the front door

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Any failure while resolving or executing a tool call
pub const CALL_FAILED: i64 = -32000;

/// Inbound request.
///
/// `id` distinguishes "absent" (notification) from an explicit `null`,
/// which is still a request and gets a response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// `tools/call` params
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallParams {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

impl CallParams {
    /// Decode from the request params; absent or null params mean "no name,
    /// no arguments"
    pub fn from_params(params: Option<Value>) -> Result<Self, serde_json::Error> {
        match params {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(params) => serde_json::from_value(params),
        }
    }

    pub fn arguments(self) -> Value {
        self.arguments.map(Value::Object).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Outbound response; exactly one of `result` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_id_is_notification() {
        let note: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(note.is_notification());

        let null_id: RpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "tools/list"}))
                .unwrap();
        assert_eq!(null_id.id, Some(Value::Null));
        assert!(!null_id.is_notification());
    }

    #[test]
    fn test_call_params() {
        let params = CallParams::from_params(Some(json!({"name": "fs.read"}))).unwrap();
        assert_eq!(params.name, "fs.read");
        assert_eq!(params.arguments(), Value::Null);

        let params =
            CallParams::from_params(Some(json!({"name": "x", "arguments": {"a": 1}}))).unwrap();
        assert_eq!(params.arguments(), json!({"a": 1}));

        assert!(CallParams::from_params(Some(json!({"name": "x", "arguments": [1]}))).is_err());
        assert!(CallParams::from_params(Some(json!("nope"))).is_err());
        assert_eq!(CallParams::from_params(None).unwrap().name, "");
    }

    #[test]
    fn test_response_shapes() {
        let ok = serde_json::to_value(RpcResponse::result(json!(1), json!({"tools": []}))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));

        let err = serde_json::to_value(RpcResponse::error(Value::Null, PARSE_ERROR, "Parse error"))
            .unwrap();
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}})
        );
    }
}

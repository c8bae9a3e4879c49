/// MCP protocol types
///
/// Only the fields the bridge inspects are typed (`id`, `method`, `error`,
/// `result`, tool name and arguments); everything else travels as
/// `serde_json::Value` untouched.
use crate::backend::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Protocol version announced to backends during the handshake
pub const CLIENT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced to backends
pub const CLIENT_NAME: &str = "toolhub";

/// Upper bound on `nextCursor` pages followed by `tools/list`
pub const MAX_TOOL_PAGES: usize = 100;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String, // always "2.0"
    /// Absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params: None,
        }
    }
}

/// Tool definition as advertised by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema, passed through without inspection
    #[serde(rename = "inputSchema", default, skip_serializing_if = "Value::is_null")]
    pub input_schema: Value,
}

/// One page of a `tools/list` result
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsPage {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// `initialize` params sent to every backend
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": CLIENT_PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// `tools/list` params for the given page cursor
pub fn list_tools_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => json!({}),
    }
}

/// `tools/call` params
pub fn call_tool_params(name: &str, arguments: Value) -> Value {
    let arguments = if arguments.is_null() {
        Value::Object(Map::new())
    } else {
        arguments
    };
    json!({ "name": name, "arguments": arguments })
}

/// Decode a `tools/list` result into one page
pub fn parse_tools_page(result: Value) -> Result<ListToolsPage, BackendError> {
    serde_json::from_value(result)
        .map_err(|e| BackendError::Protocol(format!("Invalid tools/list result: {}", e)))
}

/// Correlation key of a frame: string ids as-is, numeric ids in decimal.
///
/// Anything else (missing, null, objects) cannot correlate.
pub fn correlation_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Turn a decoded response into the call outcome.
///
/// An `error` member wins; an object `result` is returned as-is; any other
/// `result` is wrapped as `{"result": ...}`. Without `result`, `fallback`
/// decides what is wrapped.
pub fn resolve_response(mut response: Value, fallback: MissingResult) -> Result<Value, BackendError> {
    if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
        let message = match error.get("message") {
            Some(Value::String(msg)) => msg.clone(),
            Some(other) => other.to_string(),
            None => error.to_string(),
        };
        return Err(BackendError::Remote(message));
    }

    match response.get_mut("result").map(Value::take) {
        Some(result @ Value::Object(_)) => Ok(result),
        Some(other) => Ok(json!({ "result": other })),
        None => match fallback {
            MissingResult::WrapNull => Ok(json!({ "result": Value::Null })),
            MissingResult::WholeBody => Ok(response),
        },
    }
}

/// What `resolve_response` yields when a response carries no `result`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingResult {
    /// `{"result": null}`; used for stdio frames
    WrapNull,
    /// The decoded body itself; used for HTTP replies
    WholeBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(7, "tools/list", json!({}));
        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains("\"jsonrpc\":\"2.0\""));
        assert!(text.contains("\"id\":7"));

        let note = serde_json::to_value(JsonRpcRequest::notification(
            "notifications/initialized",
        ))
        .unwrap();
        assert!(note.get("id").is_none());
        assert!(note.get("params").is_none());
    }

    #[test]
    fn test_correlation_key() {
        assert_eq!(correlation_key(&json!(12)), Some("12".to_string()));
        assert_eq!(correlation_key(&json!("12")), Some("12".to_string()));
        assert_eq!(correlation_key(&json!(null)), None);
        assert_eq!(correlation_key(&json!("")), None);
        assert_eq!(correlation_key(&json!({"a": 1})), None);
    }

    #[test]
    fn test_resolve_response_shapes() {
        let ok = resolve_response(json!({"id": 1, "result": {"tools": []}}), MissingResult::WrapNull)
            .unwrap();
        assert_eq!(ok, json!({"tools": []}));

        let scalar =
            resolve_response(json!({"id": 1, "result": 42}), MissingResult::WrapNull).unwrap();
        assert_eq!(scalar, json!({"result": 42}));

        let bare = resolve_response(json!({"id": 1}), MissingResult::WrapNull).unwrap();
        assert_eq!(bare, json!({"result": null}));

        let body = resolve_response(json!({"status": "ok"}), MissingResult::WholeBody).unwrap();
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[test]
    fn test_resolve_response_error() {
        let err = resolve_response(
            json!({"id": 1, "error": {"code": -32601, "message": "Method not found"}}),
            MissingResult::WrapNull,
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::Remote(ref m) if m == "Method not found"));
    }

    #[test]
    fn test_call_tool_params_defaults_arguments() {
        let params = call_tool_params("ping", Value::Null);
        assert_eq!(params, json!({"name": "ping", "arguments": {}}));
    }

    #[test]
    fn test_tool_descriptor_passes_schema_through() {
        let page = parse_tools_page(json!({
            "tools": [
                {"name": "read", "description": "Read a file",
                 "inputSchema": {"type": "object", "x-custom": [1, 2]}},
                {"name": "bare"}
            ],
            "nextCursor": "p2"
        }))
        .unwrap();
        assert_eq!(page.tools.len(), 2);
        assert_eq!(page.tools[0].input_schema["x-custom"], json!([1, 2]));
        assert!(page.tools[1].description.is_none());
        assert!(page.tools[1].input_schema.is_null());
        assert_eq!(page.next_cursor.as_deref(), Some("p2"));
    }
}

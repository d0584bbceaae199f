//! Wire protocol shared by all transports.
//!
//! Inbound frames are single JSON objects in one of two shapes:
//!
//! - MCP JSON-RPC 2.0: `{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{...}}`
//! - direct call: `{"id":"1","tool":"create_cube","args":{...}}`
//!
//! Outbound frames are JSON-RPC responses whose error `code` is a stable
//! string from [`ErrorCode`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    UnknownTool,
    InvalidArguments,
    WorkerStartError,
    WorkerCrashedError,
    TimeoutError,
    TransportDecodeError,
    InternalError,
    /// The worker ran the tool and reported a failure.
    ToolExecutionError,
    UnknownMethod,
    /// The server is stopping and accepts no new work.
    ShuttingDown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "UnknownTool",
            Self::InvalidArguments => "InvalidArguments",
            Self::WorkerStartError => "WorkerStartError",
            Self::WorkerCrashedError => "WorkerCrashedError",
            Self::TimeoutError => "TimeoutError",
            Self::TransportDecodeError => "TransportDecodeError",
            Self::InternalError => "InternalError",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::UnknownMethod => "UnknownMethod",
            Self::ShuttingDown => "ShuttingDown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `error` member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Correlation token: a JSON string or number, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Value);

impl RequestId {
    /// Accepts strings and numbers only.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) | Value::Number(_) => Some(Self(value.clone())),
            _ => None,
        }
    }

    /// Key for in-flight bookkeeping; `1` and `"1"` are distinct ids.
    pub fn key(&self) -> String {
        self.0.to_string()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(Value::String(id.to_string()))
    }
}

impl From<i32> for RequestId {
    fn from(id: i32) -> Self {
        Self(Value::from(id))
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self(Value::from(id))
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(Value::from(id))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// JSON-RPC response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `null` when the request id could not be recovered.
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Serialize as a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Only reachable with non-string map keys in `result`/`data`.
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":"InternalError","message":"failed to encode response: {}"}}}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

// ============================================================================
// Tool calls
// ============================================================================

/// Which frame shape a tool call arrived in; decides how results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// MCP `tools/call`: result is a `CallToolResult`.
    Mcp,
    /// Direct `{id, tool, args}` frame: result is the raw worker value.
    Direct,
}

/// A decoded tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: RequestId,
    pub tool_name: String,
    pub arguments: Value,
    pub style: CallStyle,
}

impl ToolRequest {
    pub fn new(id: impl Into<RequestId>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            style: CallStyle::Direct,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(ErrorObject),
}

impl ToolOutcome {
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failure(ErrorObject::new(code, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success(_) => None,
            Self::Failure(e) => Some(e.code),
        }
    }
}

/// Exactly one per [`ToolRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: RequestId,
    pub outcome: ToolOutcome,
}

// ============================================================================
// Inbound
// ============================================================================

/// A JSON-RPC request that expects a response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

/// A JSON-RPC notification (no id, never answered).
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

impl Notification {
    /// `params.requestId` of a `notifications/cancelled` notification.
    pub fn cancelled_request(&self) -> Option<RequestId> {
        if self.method != "notifications/cancelled" {
            return None;
        }
        self.params.get("requestId").and_then(RequestId::from_value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(RpcRequest),
    Direct(ToolRequest),
    Notification(Notification),
}

impl Inbound {
    /// Correlation id, if this frame expects a response.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Direct(t) => Some(&t.id),
            Self::Notification(_) => None,
        }
    }
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    /// Salvaged from the frame when possible.
    pub id: Option<RequestId>,
    pub message: String,
}

impl DecodeError {
    pub fn new(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }

    pub fn into_response(self) -> JsonRpcResponse {
        JsonRpcResponse::error(
            self.id,
            ErrorObject::new(ErrorCode::TransportDecodeError, self.message),
        )
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Decode one frame (a stdio line without its newline, or an HTTP body).
pub fn decode_frame(bytes: &[u8]) -> Result<Inbound, DecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DecodeError::new(None, format!("frame is not valid UTF-8: {}", e)))?;
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| DecodeError::new(None, format!("invalid JSON: {}", e)))?;
    let Value::Object(frame) = value else {
        return Err(DecodeError::new(None, "frame must be a JSON object"));
    };
    decode_object(frame)
}

fn decode_object(mut frame: Map<String, Value>) -> Result<Inbound, DecodeError> {
    let id = match frame.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
            DecodeError::new(None, "'id' must be a string or a number")
        })?),
    };

    if let Some(tool) = frame.get("tool") {
        let Some(id) = id else {
            return Err(DecodeError::new(None, "direct call frame requires an 'id'"));
        };
        let Some(tool_name) = tool.as_str().map(str::to_string) else {
            return Err(DecodeError::new(Some(id), "'tool' must be a string"));
        };
        let arguments = frame
            .remove("args")
            .or_else(|| frame.remove("arguments"))
            .unwrap_or(Value::Null);
        return Ok(Inbound::Direct(ToolRequest {
            id,
            tool_name,
            arguments,
            style: CallStyle::Direct,
        }));
    }

    if let Some(version) = frame.get("jsonrpc") {
        if version.as_str() != Some("2.0") {
            return Err(DecodeError::new(id, "unsupported 'jsonrpc' version"));
        }
    }

    let method = match frame.get("method") {
        Some(Value::String(m)) => m.clone(),
        Some(_) => return Err(DecodeError::new(id, "'method' must be a string")),
        None => {
            return Err(DecodeError::new(
                id,
                "frame has neither 'method' nor 'tool'",
            ));
        }
    };
    let params = frame.remove("params").unwrap_or(Value::Null);

    Ok(match id {
        Some(id) => Inbound::Request(RpcRequest { id, method, params }),
        None => Inbound::Notification(Notification { method, params }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_direct_call() {
        let frame = br#"{"id":"1","tool":"create_cube","args":{"name":"Cube","size":2.0}}"#;
        let Inbound::Direct(req) = decode_frame(frame).unwrap() else {
            panic!("expected direct call");
        };
        assert_eq!(req.id, RequestId::from("1"));
        assert_eq!(req.tool_name, "create_cube");
        assert_eq!(req.arguments, json!({ "name": "Cube", "size": 2.0 }));
        assert_eq!(req.style, CallStyle::Direct);
    }

    #[test]
    fn test_decode_jsonrpc_request_and_notification() {
        let req = decode_frame(br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(req.id(), Some(&RequestId::from(7)));
        assert!(matches!(req, Inbound::Request(ref r) if r.method == "tools/list" && r.params.is_null()));

        let note = decode_frame(
            br#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":7}}"#,
        )
        .unwrap();
        let Inbound::Notification(note) = note else {
            panic!("expected notification");
        };
        assert_eq!(note.cancelled_request(), Some(RequestId::from(7)));
    }

    #[test]
    fn test_jsonrpc_field_optional_but_checked() {
        assert!(decode_frame(br#"{"id":1,"method":"ping"}"#).is_ok());

        let err = decode_frame(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from(1)));
    }

    #[test]
    fn test_malformed_frames() {
        let err = decode_frame(b"{not json").unwrap_err();
        assert_eq!(err.id, None);
        assert!(err.message.starts_with("invalid JSON"));

        let err = decode_frame(&[0xff, 0xfe, b'{']).unwrap_err();
        assert!(err.message.contains("UTF-8"));

        let err = decode_frame(b"[1,2,3]").unwrap_err();
        assert_eq!(err.message, "frame must be a JSON object");

        // id salvaged from an otherwise unusable frame
        let err = decode_frame(br#"{"id":"abc","params":{}}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from("abc")));

        let err = decode_frame(br#"{"tool":"create_cube"}"#).unwrap_err();
        assert!(err.message.contains("requires an 'id'"));

        let err = decode_frame(br#"{"id":{"x":1},"method":"ping"}"#).unwrap_err();
        assert_eq!(err.id, None);
    }

    #[test]
    fn test_error_response_shape() {
        let resp = DecodeError::new(None, "bad frame").into_response();
        let value: Value = serde_json::from_str(&resp.to_line()).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": "TransportDecodeError", "message": "bad frame" }
            })
        );
    }

    #[test]
    fn test_success_response_keeps_id_type() {
        let resp = JsonRpcResponse::success(RequestId::from(3), json!("done"));
        assert_eq!(resp.to_line(), r#"{"jsonrpc":"2.0","id":3,"result":"done"}"#);
    }

    #[test]
    fn test_id_keys_distinguish_types() {
        assert_ne!(RequestId::from(1).key(), RequestId::from("1").key());
    }
}

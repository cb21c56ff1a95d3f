use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::UserContext;

/// MCP protocol revision advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Server identity reported in `serverInfo` and the health probe.
pub const SERVER_NAME: &str = "workforce-mcp-server";

/// JSON-RPC 2.0 Request structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String, // Must be "2.0"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A notification carries no id (or an explicit null) and must never
    /// receive a response.
    pub fn is_notification(&self) -> bool {
        matches!(&self.id, None | Some(Value::Null))
    }
}

/// JSON-RPC 2.0 Response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String, // Must be "2.0"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 Error structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        }
    }

    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "Invalid Request".to_string(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }

    pub fn invalid_params(msg: &str) -> Self {
        Self {
            code: -32602,
            message: "Invalid params".to_string(),
            data: Some(serde_json::json!({ "error": msg })),
        }
    }

    pub fn internal_error(msg: &str) -> Self {
        Self {
            code: -32603,
            message: "Internal error".to_string(),
            data: Some(serde_json::json!({ "error": msg })),
        }
    }

    pub fn custom(code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            code,
            message,
            data,
        }
    }
}

/// Checks a decoded payload against the JSON-RPC 2.0 envelope rules:
/// `jsonrpc` must be the literal "2.0", `method` a non-empty string, and
/// `id` (when present) a string, number or null.
///
/// On failure returns the `-32600` response to send back, with the id
/// salvaged from the payload when it is at least of a legal type.
pub fn validate_envelope(value: Value) -> Result<JsonRpcRequest, Box<JsonRpcResponse>> {
    let invalid = |value: &Value| {
        let id = match value.get("id") {
            Some(id @ (Value::String(_) | Value::Number(_))) => Some(id.clone()),
            _ => Some(Value::Null),
        };
        Box::new(JsonRpcResponse::error(id, JsonRpcError::invalid_request()))
    };

    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return Err(invalid(&value)),
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(invalid(&value));
    }

    match obj.get("method").and_then(Value::as_str) {
        Some(m) if !m.is_empty() => {}
        _ => return Err(invalid(&value)),
    }

    match obj.get("id") {
        None | Some(Value::Null | Value::String(_) | Value::Number(_)) => {}
        Some(_) => return Err(invalid(&value)),
    }

    serde_json::from_value(value.clone()).map_err(|_| invalid(&value))
}

// MCP-specific types

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value, // JSON Schema for parameters
}

/// Response for tools/list method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<Tool>,
}

/// Request for tools/call method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Response for tools/call method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResponse {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: None,
        }
    }

    pub fn error(text: String) -> Self {
        Self {
            content: vec![ToolContent::Text { text }],
            is_error: Some(true),
        }
    }
}

/// Tool execution result content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String, // base64 encoded
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// MCP Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo", skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
}

/// Client information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// MCP Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

/// Tools capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Feature flags advertised in the `transport/welcome` notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WelcomeFeatures {
    pub heartbeat: bool,
    pub sessions: bool,
    pub compression: bool,
    #[serde(rename = "userContext")]
    pub user_context: bool,
}

/// Builds the `transport/welcome` notification sent right after a WebSocket
/// connection is registered.
pub fn welcome_notification(
    connection_id: &str,
    session_id: Option<&str>,
    features: WelcomeFeatures,
) -> Value {
    let mut params = serde_json::json!({
        "connectionId": connection_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "features": features,
    });
    if let Some(session_id) = session_id {
        params["sessionId"] = Value::String(session_id.to_string());
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "transport/welcome",
        "params": params,
    })
}

/// Control-plane pong sent in reply to a `{type:"ping"}` message.
pub fn pong_message() -> Value {
    serde_json::json!({
        "type": "pong",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// Attaches the resolved user/session context to request params as the
/// `_context` object, the way every dispatcher does before tool execution.
/// Array params and absent params pass through untouched.
pub fn enrich_params(
    params: Option<Value>,
    user_context: Option<&UserContext>,
    connection_id: &str,
) -> Option<Value> {
    let context = match user_context {
        Some(ctx) => ctx,
        None => return params,
    };
    match params {
        Some(Value::Object(mut map)) => {
            map.insert(
                "_context".to_string(),
                serde_json::json!({
                    "userId": context.user_id,
                    "organizationId": context.organization_id,
                    "tenantId": context.tenant_id,
                    "sessionId": context.session_id,
                    "connectionId": connection_id,
                }),
            );
            Some(Value::Object(map))
        }
        other => other,
    }
}

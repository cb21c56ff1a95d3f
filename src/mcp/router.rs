use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::protocol::{
    enrich_params, CallToolRequest, CallToolResponse, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerCapabilities, ServerInfo, Tool,
    ToolListResponse, ToolsCapability, PROTOCOL_VERSION,
};
use super::registry::{ToolContext, ToolRegistry};
use crate::session::{SessionRegistry, UserContext};
use crate::transport::TransportKind;

/// Tool-listing TTL shared by every carrier.
const TOOL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Single-snapshot tool cache. `tools/list` repopulates it only after the
/// TTL has elapsed, never per-request.
pub struct ToolCache {
    ttl: Duration,
    inner: Mutex<Option<(Instant, Vec<Tool>)>>,
}

impl ToolCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(None),
        }
    }

    pub fn get(&self, fetch: impl FnOnce() -> Vec<Tool>) -> Vec<Tool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((fetched_at, tools)) = inner.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                tracing::debug!("Returning cached tools list");
                return tools.clone();
            }
        }
        let tools = fetch();
        tracing::debug!(count = tools.len(), "Tool cache refreshed");
        *inner = Some((Instant::now(), tools.clone()));
        tools
    }
}

/// Per-request routing context: which carrier the message arrived on and
/// the identity resolved at bind time.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub connection_id: String,
    pub kind: TransportKind,
    pub user_context: Option<UserContext>,
}

/// Shared JSON-RPC method router. Every carrier decodes frames its own way
/// and funnels well-formed requests through here, so `initialize`,
/// `tools/list` and `tools/call` behave identically on stdio, HTTP and
/// WebSocket.
pub struct McpRouter {
    tools: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionRegistry>,
    cache: ToolCache,
}

impl McpRouter {
    pub fn new(tools: Arc<ToolRegistry>, sessions: Arc<dyn SessionRegistry>) -> Self {
        Self::with_cache_ttl(tools, sessions, TOOL_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        tools: Arc<ToolRegistry>,
        sessions: Arc<dyn SessionRegistry>,
        ttl: Duration,
    ) -> Self {
        Self {
            tools,
            sessions,
            cache: ToolCache::new(ttl),
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRegistry> {
        &self.sessions
    }

    /// Routes one request. Returns `None` for notifications, which must not
    /// receive a response on any carrier.
    pub async fn dispatch(&self, req: JsonRpcRequest, scope: &RequestScope) -> Option<JsonRpcResponse> {
        if req.is_notification() {
            if req.method == "notifications/initialized" {
                tracing::info!("Ignoring notifications/initialized (notification)");
            } else {
                tracing::debug!(method = %req.method, "Ignoring notification without id");
            }
            return None;
        }

        let method = req.method.clone();
        let id = req.id.clone();
        let params = enrich_params(
            req.params,
            scope.user_context.as_ref(),
            &scope.connection_id,
        );

        let response = match method.as_str() {
            "initialize" => self.handle_initialize(id.clone(), params),
            "tools/list" => self.handle_tools_list(id.clone()),
            "tools/call" => self.handle_tools_call(id.clone(), params, scope).await,
            _ => JsonRpcResponse::error(id.clone(), JsonRpcError::method_not_found(&method)),
        };

        // Every outbound response refreshes the bound session's activity
        if let Some(context) = &scope.user_context {
            self.sessions.update_activity(
                &context.session_id,
                serde_json::json!({
                    "lastMcpMethod": method,
                    "lastMcpId": id,
                    "lastMcpTimestamp": chrono::Utc::now().to_rfc3339(),
                    "connectionType": scope.kind.as_str(),
                }),
            );
        }

        Some(response)
    }

    fn handle_initialize(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        if let Some(params) = params {
            if let Ok(params) = serde_json::from_value::<InitializeParams>(params) {
                tracing::info!(
                    protocol_version = %params.protocol_version,
                    client = params
                        .client_info
                        .as_ref()
                        .map(|c| c.name.as_str())
                        .unwrap_or("unknown"),
                    "MCP client initialized"
                );
            }
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo::default(),
        };

        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools = self.cache.get(|| self.tools.list_tools());
        tracing::debug!(count = tools.len(), "Listing available tools");
        let result = ToolListResponse { tools };
        JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
    }

    async fn handle_tools_call(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        scope: &RequestScope,
    ) -> JsonRpcResponse {
        let call_req: CallToolRequest = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return JsonRpcResponse::error(id, JsonRpcError::invalid_params(&e.to_string()))
                }
            },
            None => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params"))
            }
        };

        let tool_span = tracing::info_span!(
            "mcp_tool_call",
            tool = %call_req.name,
            connection = %scope.connection_id
        );
        let _enter = tool_span.enter();

        match self.tools.get(&call_req.name) {
            Some(handler) => {
                let context = ToolContext {
                    user: scope.user_context.clone(),
                    connection_id: scope.connection_id.clone(),
                };

                match handler
                    .execute(
                        call_req.arguments.unwrap_or(serde_json::json!({})),
                        &context,
                    )
                    .await
                {
                    Ok(content) => {
                        tracing::info!("Tool executed successfully");
                        let response = CallToolResponse {
                            content: vec![content],
                            is_error: None,
                        };
                        JsonRpcResponse::success(id, serde_json::to_value(response).unwrap())
                    }
                    Err(e) => {
                        tracing::error!("Tool execution failed: {}", e);
                        let response = CallToolResponse::error(format!("Error: {}", e));
                        JsonRpcResponse::success(id, serde_json::to_value(response).unwrap())
                    }
                }
            }
            None => {
                tracing::warn!("Tool not found: {}", call_req.name);
                JsonRpcResponse::error(
                    id,
                    JsonRpcError::custom(-32001, format!("Tool not found: {}", call_req.name), None),
                )
            }
        }
    }
}

//! Shared harness for the transport integration tests: spawns real
//! carriers on ephemeral ports and exposes the injected registries so
//! tests can reach behind the wire.

use std::net::TcpListener;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use workforce_mcp::configuration::Settings;
use workforce_mcp::mcp::{
    ConnectionRegistry, McpRouter, Tool, ToolContent, ToolContext, ToolHandler, ToolRegistry,
};
use workforce_mcp::session::{InMemorySessionStore, SessionRegistry, SessionStoreConfig};
use workforce_mcp::startup;

/// Echoes its arguments and the caller context, so tests can observe what
/// reached the tool layer.
pub struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, args: Value, context: &ToolContext) -> Result<ToolContent, String> {
        Ok(ToolContent::Text {
            text: serde_json::json!({
                "args": args,
                "userId": context.user.as_ref().map(|u| u.user_id.clone()),
                "sessionId": context.user.as_ref().map(|u| u.session_id.clone()),
                "connectionId": context.connection_id,
            })
            .to_string(),
        })
    }

    fn schema(&self) -> Tool {
        Tool {
            name: "echo".to_string(),
            description: "Echoes its arguments".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }
}

pub fn test_settings() -> Settings {
    serde_json::from_value(serde_json::json!({
        "environment": "development",
        "transport": "auto",
        "session": {
            "enabled": true,
            "secret": "integration-test-secret",
            "rate_limit_max": 1000
        }
    }))
    .expect("test settings are valid")
}

fn build_router(sessions: &Arc<dyn SessionRegistry>) -> Arc<McpRouter> {
    let mut registry = ToolRegistry::new();
    registry.register("echo", Box::new(EchoTool));
    Arc::new(McpRouter::new(Arc::new(registry), sessions.clone()))
}

pub struct TestApp {
    pub address: String,
    pub sessions: Arc<dyn SessionRegistry>,
}

pub async fn spawn_http_app(settings: Settings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let sessions: Arc<dyn SessionRegistry> =
        Arc::new(InMemorySessionStore::new(SessionStoreConfig::default()));
    let router = build_router(&sessions);

    let server = startup::run(listener, router, sessions.clone(), settings)
        .await
        .expect("Failed to start HTTP carrier");
    tokio::spawn(server);

    TestApp { address, sessions }
}

pub struct WsTestApp {
    pub url: String,
    pub sessions: Arc<dyn SessionRegistry>,
    pub connections: Arc<ConnectionRegistry>,
}

pub async fn spawn_ws_app(settings: Settings) -> WsTestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let url = format!("ws://127.0.0.1:{}{}", port, settings.websocket.path);

    let sessions: Arc<dyn SessionRegistry> =
        Arc::new(InMemorySessionStore::new(SessionStoreConfig::default()));
    let router = build_router(&sessions);
    let connections = Arc::new(ConnectionRegistry::new());

    let server = startup::run_websocket(
        listener,
        router,
        sessions.clone(),
        connections.clone(),
        settings,
    )
    .await
    .expect("Failed to start WebSocket carrier");
    tokio::spawn(server);

    WsTestApp {
        url,
        sessions,
        connections,
    }
}

//! HTTP carrier integration tests: envelope handling, method routing and
//! the health probe, driven over a real listener.

mod common;

use common::{spawn_http_app, test_settings};
use serde_json::{json, Value};

#[tokio::test]
async fn health_check_works() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(&format!("{}/health", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["server"], "workforce-mcp-server");
    // Sessions are enabled in the test settings, so counts are reported
    assert_eq!(body["sessions"]["total"], 0);
}

#[tokio::test]
async fn initialize_round_trip() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            }
        }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["result"]["serverInfo"]["name"], "workforce-mcp-server");
}

#[tokio::test]
async fn unknown_method_returns_32601_with_id() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({"jsonrpc": "2.0", "method": "unknown/method", "id": 3}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 3);
}

#[tokio::test]
async fn invalid_envelope_is_jsonrpc_error_not_http_error() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    // Wrong version string: structurally invalid, but still HTTP success
    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({"jsonrpc": "1.0", "method": "initialize", "id": 9}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    // Missing method entirely
    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({"jsonrpc": "2.0", "id": 10}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn malformed_json_is_parse_error() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .header("content-type", "application/json")
        .body("{ invalid json }")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn notification_gets_204_and_no_body() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn tools_list_and_call() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "echo");
    assert!(tools[0].get("inputSchema").is_some());

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 2,
            "params": {"name": "echo", "arguments": {"hello": "world"}}
        }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let echoed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(echoed["args"]["hello"], "world");
    // No session presented: no user context reaches the tool
    assert_eq!(echoed["userId"], Value::Null);
}

#[tokio::test]
async fn unknown_tool_returns_32001() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 5,
            "params": {"name": "no_such_tool"}
        }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn bound_session_enriches_tool_context() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let session = app
        .sessions
        .create_session(workforce_mcp::session::CreateSessionOptions {
            user_id: Some("user-42".to_string()),
            auto_authenticate: true,
            ..Default::default()
        })
        .unwrap();

    let response = client
        .post(&format!("{}/mcp", &app.address))
        .header("mcp-session-id", session.id.clone())
        .json(&json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": 6,
            "params": {"name": "echo", "arguments": {}}
        }))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let echoed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(echoed["userId"], "user-42");
    assert_eq!(echoed["sessionId"], session.id.as_str());
}

#[tokio::test]
async fn event_stream_emits_connected_event() {
    let app = spawn_http_app(test_settings()).await;
    let client = reqwest::Client::new();

    let mut response = client
        .get(&format!("{}/mcp/events", &app.address))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response
            .headers()
            .get("x-accel-buffering")
            .unwrap()
            .to_str()
            .unwrap(),
        "no"
    );

    // First chunk is the connected event; the stream then idles on pings
    let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), response.chunk())
        .await
        .expect("timed out waiting for first event")
        .unwrap()
        .expect("stream ended early");
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.starts_with("data: "));
    assert!(text.contains("\"type\":\"connected\""));
}

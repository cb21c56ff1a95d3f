//! WebSocket carrier integration tests: welcome handshake, control
//! ping/pong, JSON-RPC routing, origin rejection, session binding and
//! cascade, heartbeat reaping, and session-targeted sends.

mod common;

use std::time::Duration;

use common::{spawn_ws_app, test_settings};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use workforce_mcp::session::CreateSessionOptions;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(url: &str) -> WsClient {
    let (socket, _) = connect_async(url).await.expect("WebSocket connect failed");
    socket
}

/// Next frame, skipping protocol-level ping/pong noise from the heartbeat.
async fn next_message(socket: &mut WsClient) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("protocol error");
        match frame {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

/// Asserts that no data frame arrives within the window; heartbeat
/// ping/pong frames do not count.
async fn assert_quiet(socket: &mut WsClient, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, socket.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(frame) => panic!("expected quiet socket, got {:?}", frame),
        }
    }
}

async fn next_json(socket: &mut WsClient) -> Value {
    match next_message(socket).await {
        Message::Text(text) => serde_json::from_str(&text).expect("invalid JSON frame"),
        other => panic!("expected text frame, got {:?}", other),
    }
}

async fn read_welcome(socket: &mut WsClient) -> Value {
    let welcome = next_json(socket).await;
    assert_eq!(welcome["method"], "transport/welcome");
    welcome
}

#[tokio::test]
async fn welcome_is_sent_first_with_features() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;

    let welcome = read_welcome(&mut socket).await;
    assert_eq!(welcome["jsonrpc"], "2.0");
    assert!(welcome["params"]["connectionId"]
        .as_str()
        .unwrap()
        .starts_with("ws_"));
    assert_eq!(welcome["params"]["features"]["heartbeat"], true);
    assert_eq!(welcome["params"]["features"]["sessions"], true);
    assert_eq!(welcome["params"]["features"]["userContext"], false);
    assert!(welcome["params"].get("sessionId").is_none());
}

#[tokio::test]
async fn control_ping_gets_pong() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    socket
        .send(Message::Text(json!({"type": "ping"}).to_string()))
        .await
        .unwrap();

    let pong = next_json(&mut socket).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn malformed_json_yields_parse_error() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    socket
        .send(Message::Text("{ invalid json }".to_string()))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["error"]["message"], "Parse error");
}

#[tokio::test]
async fn non_jsonrpc_payload_is_invalid_request() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    socket
        .send(Message::Text(json!({"hello": "world"}).to_string()))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_method_keeps_request_id() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "method": "unknown/method", "id": 3}).to_string(),
        ))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    assert_eq!(response["error"]["code"], -32601);
    assert_eq!(response["id"], 3);
}

#[tokio::test]
async fn initialize_matches_http_carrier() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "method": "initialize", "id": 1, "params": {}}).to_string(),
        ))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(
        response["result"]["serverInfo"]["name"],
        "workforce-mcp-server"
    );
}

#[tokio::test]
async fn binary_frames_are_normalized_to_text() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    let payload = json!({"jsonrpc": "2.0", "method": "tools/list", "id": 11}).to_string();
    socket
        .send(Message::Binary(payload.into_bytes()))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    assert_eq!(response["id"], 11);
    assert_eq!(response["result"]["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn notifications_receive_no_frame() {
    let app = spawn_ws_app(test_settings()).await;
    let mut socket = connect(&app.url).await;
    read_welcome(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
        ))
        .await
        .unwrap();
    // Follow with an identified request; the next response must belong to
    // it, proving the notification produced nothing
    socket
        .send(Message::Text(
            json!({"jsonrpc": "2.0", "method": "initialize", "id": 2}).to_string(),
        ))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    assert_eq!(response["id"], 2);
}

#[tokio::test]
async fn disallowed_origin_is_closed_1008_before_welcome() {
    let mut settings = test_settings();
    settings.websocket.allowed_origins = Some(vec!["https://app.example.com".to_string()]);
    let app = spawn_ws_app(settings).await;

    let mut request = app.url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://evil.example".parse().unwrap());

    let (mut socket, _) = connect_async(request).await.expect("upgrade should succeed");
    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn allowed_origin_is_welcomed() {
    let mut settings = test_settings();
    settings.websocket.allowed_origins = Some(vec!["https://app.example.com".to_string()]);
    let app = spawn_ws_app(settings).await;

    let mut request = app.url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://app.example.com".parse().unwrap());

    let (mut socket, _) = connect_async(request).await.unwrap();
    read_welcome(&mut socket).await;
}

#[tokio::test]
async fn wildcard_origin_allows_anything() {
    let mut settings = test_settings();
    settings.websocket.allowed_origins = Some(vec!["*".to_string()]);
    let app = spawn_ws_app(settings).await;

    let mut request = app.url.clone().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "https://anywhere.example".parse().unwrap());

    let (mut socket, _) = connect_async(request).await.unwrap();
    read_welcome(&mut socket).await;
}

#[tokio::test]
async fn session_binding_resolves_user_context() {
    let app = spawn_ws_app(test_settings()).await;
    let session = app
        .sessions
        .create_session(CreateSessionOptions {
            user_id: Some("user-7".to_string()),
            auto_authenticate: true,
            ..Default::default()
        })
        .unwrap();

    let mut socket = connect(&format!("{}?sessionId={}", app.url, session.id)).await;
    let welcome = read_welcome(&mut socket).await;
    assert_eq!(welcome["params"]["sessionId"], session.id.as_str());
    assert_eq!(welcome["params"]["features"]["userContext"], true);

    socket
        .send(Message::Text(
            json!({
                "jsonrpc": "2.0",
                "method": "tools/call",
                "id": 4,
                "params": {"name": "echo", "arguments": {"x": 1}}
            })
            .to_string(),
        ))
        .await
        .unwrap();

    let response = next_json(&mut socket).await;
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let echoed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(echoed["userId"], "user-7");
    assert_eq!(echoed["sessionId"], session.id.as_str());

    // The binding is visible through the session registry
    let bindings = app.sessions.get_connections(&session.id);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].kind, "websocket");
}

#[tokio::test]
async fn invalid_session_is_closed_1008() {
    let app = spawn_ws_app(test_settings()).await;

    let mut socket = connect(&format!("{}?sessionId=sess_bogus", app.url)).await;
    match next_message(&mut socket).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
            assert!(frame.reason.contains("Session validation failed"));
        }
        other => panic!("expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn send_to_session_reaches_only_bound_connections() {
    let app = spawn_ws_app(test_settings()).await;
    let session_a = app
        .sessions
        .create_session(CreateSessionOptions {
            user_id: Some("alice".to_string()),
            auto_authenticate: true,
            ..Default::default()
        })
        .unwrap();
    let session_b = app
        .sessions
        .create_session(CreateSessionOptions {
            user_id: Some("bob".to_string()),
            auto_authenticate: true,
            ..Default::default()
        })
        .unwrap();

    let mut a1 = connect(&format!("{}?sessionId={}", app.url, session_a.id)).await;
    let mut a2 = connect(&format!("{}?sessionId={}", app.url, session_a.id)).await;
    let mut b = connect(&format!("{}?sessionId={}", app.url, session_b.id)).await;
    let mut unbound = connect(&app.url).await;
    read_welcome(&mut a1).await;
    read_welcome(&mut a2).await;
    read_welcome(&mut b).await;
    read_welcome(&mut unbound).await;

    let notice = json!({"jsonrpc": "2.0", "method": "session/notice", "params": {"n": 1}});
    assert!(app.connections.send_to_session(&session_a.id, &notice));
    assert!(!app.connections.send_to_session("sess_nobody", &notice));

    assert_eq!(next_json(&mut a1).await["method"], "session/notice");
    assert_eq!(next_json(&mut a2).await["method"], "session/notice");

    // Neither the other session nor the unbound socket hears anything
    assert_quiet(&mut b, Duration::from_millis(300)).await;
    assert_quiet(&mut unbound, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn broadcast_reaches_every_connection() {
    let app = spawn_ws_app(test_settings()).await;
    let mut one = connect(&app.url).await;
    let mut two = connect(&app.url).await;
    read_welcome(&mut one).await;
    read_welcome(&mut two).await;

    let notice = json!({"jsonrpc": "2.0", "method": "server/notice", "params": {}});
    assert_eq!(app.connections.broadcast(&notice), 2);

    assert_eq!(next_json(&mut one).await["method"], "server/notice");
    assert_eq!(next_json(&mut two).await["method"], "server/notice");
}

#[tokio::test]
async fn deleting_session_closes_bound_connections_with_1000() {
    let app = spawn_ws_app(test_settings()).await;
    let session = app
        .sessions
        .create_session(CreateSessionOptions {
            user_id: Some("alice".to_string()),
            auto_authenticate: true,
            ..Default::default()
        })
        .unwrap();

    let mut one = connect(&format!("{}?sessionId={}", app.url, session.id)).await;
    let mut two = connect(&format!("{}?sessionId={}", app.url, session.id)).await;
    read_welcome(&mut one).await;
    read_welcome(&mut two).await;
    assert_eq!(app.connections.len(), 2);

    assert!(workforce_mcp::mcp::websocket::delete_session(
        &app.connections,
        &app.sessions,
        &session.id,
    ));

    for socket in [&mut one, &mut two] {
        match next_message(socket).await {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    // Actors deregister as they stop
    for _ in 0..50 {
        if app.connections.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(app.connections.is_empty());
    assert!(app.sessions.get_connections(&session.id).is_empty());
}

#[tokio::test]
async fn unanswered_heartbeat_reaps_the_connection() {
    // Probe every second; a client that never answers pings is gone after
    // two cycles
    let mut settings = test_settings();
    settings.websocket.heartbeat_interval_secs = 1;
    let app = spawn_ws_app(settings).await;
    let socket = connect(&app.url).await;

    for _ in 0..50 {
        if app.connections.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(app.connections.len(), 1);

    // Hold the socket open but never poll it, so the library's automatic
    // pong replies are never flushed
    for _ in 0..80 {
        if app.connections.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(app.connections.is_empty(), "dead connection was not reaped");
    drop(socket);
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix::{Actor, ActorContext, AsyncContext, Handler, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use actix_web_actors::ws::{CloseCode, CloseReason};
use serde_json::Value;

use super::connections::{CloseConnection, ConnectionEntry, ConnectionRegistry, WriteFrame};
use super::protocol::{
    pong_message, validate_envelope, welcome_notification, JsonRpcError, JsonRpcResponse,
    WelcomeFeatures,
};
use super::router::{McpRouter, RequestScope};
use crate::configuration::Settings;
use crate::helpers::client_ip;
use crate::session::{SessionRegistry, SessionValidation, UserContext};
use crate::transport::TransportKind;

/// Session identity bound during the handshake; immutable for the socket's
/// lifetime.
#[derive(Debug, Clone)]
struct BoundSession {
    session_id: String,
    user_context: UserContext,
}

/// MCP WebSocket actor: one per accepted connection. Frames arrive in
/// order through the actor mailbox; the heartbeat interval lives inside
/// the actor so it dies with the connection.
pub struct McpWebSocket {
    connection_id: String,
    session: Option<BoundSession>,
    router: Arc<McpRouter>,
    sessions: Arc<dyn SessionRegistry>,
    connections: Arc<ConnectionRegistry>,
    heartbeat_interval: Duration,
    features: WelcomeFeatures,
    is_alive: bool,
    buffered: Arc<AtomicUsize>,
    reject: Option<CloseReason>,
}

impl McpWebSocket {
    /// Probes liveness once per interval: a connection that left the
    /// previous ping unanswered is terminated and dropped from both
    /// registries; everyone else gets the flag lowered and a fresh ping.
    fn heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if !act.is_alive {
                tracing::warn!(
                    connection_id = %act.connection_id,
                    "WebSocket heartbeat missed, terminating connection"
                );
                act.connections.deregister(&act.connection_id);
                act.sessions.remove_connection(&act.connection_id);
                ctx.stop();
                return;
            }

            act.is_alive = false;
            ctx.ping(b"");
        });
    }

    fn send_json(&self, message: &Value) {
        if !self.connections.send_json(&self.connection_id, message) {
            tracing::warn!(
                connection_id = %self.connection_id,
                "Outbound frame not delivered"
            );
        }
    }

    fn send_error(&self, id: Option<Value>, error: JsonRpcError) {
        let id = Some(id.unwrap_or(Value::Null));
        let response = JsonRpcResponse::error(id, error);
        self.send_json(&serde_json::to_value(&response).unwrap());
    }

    /// Text and binary frames funnel through here once normalized to text.
    fn handle_payload(&mut self, text: &str, _ctx: &mut <Self as Actor>::Context) {
        let message: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    connection_id = %self.connection_id,
                    "Failed to parse inbound message: {}", e
                );
                self.send_error(None, JsonRpcError::parse_error());
                return;
            }
        };

        if self.session.is_some() {
            self.sessions.touch_connection(&self.connection_id);
        }

        // Control-plane ping, outside JSON-RPC
        if message.get("type").and_then(Value::as_str) == Some("ping") {
            self.send_json(&pong_message());
            return;
        }

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            tracing::warn!(
                connection_id = %self.connection_id,
                "Received invalid message format"
            );
            self.send_error(None, JsonRpcError::invalid_request());
            return;
        }

        let request = match validate_envelope(message) {
            Ok(request) => request,
            Err(response) => {
                self.send_json(&serde_json::to_value(&*response).unwrap());
                return;
            }
        };

        let scope = RequestScope {
            connection_id: self.connection_id.clone(),
            kind: TransportKind::WebSocket,
            user_context: self.session.as_ref().map(|s| s.user_context.clone()),
        };
        let router = self.router.clone();
        let connections = self.connections.clone();
        let connection_id = self.connection_id.clone();

        actix::spawn(async move {
            match router.dispatch(request, &scope).await {
                Some(response) => {
                    connections.send_json(&connection_id, &serde_json::to_value(&response).unwrap());
                }
                None => {
                    tracing::debug!(%connection_id, "Dropped response for notification (no id)");
                }
            }
        });
    }
}

impl Actor for McpWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        // Handshake rejections close before registration or welcome
        if let Some(reason) = self.reject.take() {
            tracing::warn!(
                connection_id = %self.connection_id,
                code = ?reason.code,
                "Closing rejected WebSocket connection"
            );
            ctx.close(Some(reason));
            ctx.stop();
            return;
        }

        self.connections.register(
            self.connection_id.clone(),
            ConnectionEntry {
                writer: ctx.address().recipient(),
                closer: ctx.address().recipient(),
                session_id: self.session.as_ref().map(|s| s.session_id.clone()),
                buffered: self.buffered.clone(),
            },
        );

        tracing::info!(
            connection_id = %self.connection_id,
            session_id = self.session.as_ref().map(|s| s.session_id.as_str()).unwrap_or("-"),
            "MCP WebSocket connection started"
        );

        self.send_json(&welcome_notification(
            &self.connection_id,
            self.session.as_ref().map(|s| s.session_id.as_str()),
            self.features,
        ));

        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Idempotent with the heartbeat-reap path
        self.connections.deregister(&self.connection_id);
        self.sessions.remove_connection(&self.connection_id);
        tracing::info!(
            connection_id = %self.connection_id,
            "MCP WebSocket connection closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for McpWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.is_alive = true;
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.is_alive = true;
                if self.session.is_some() {
                    self.sessions.touch_connection(&self.connection_id);
                }
            }
            Ok(ws::Message::Text(text)) => {
                self.handle_payload(&text, ctx);
            }
            Ok(ws::Message::Binary(bin)) => {
                // Binary payloads are normalized to text before parsing
                let text = String::from_utf8_lossy(&bin).into_owned();
                self.handle_payload(&text, ctx);
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(
                    connection_id = %self.connection_id,
                    "WebSocket close received: {:?}", reason
                );
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    "Continuation frames not supported"
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::error!(
                    connection_id = %self.connection_id,
                    "WebSocket protocol error: {}", e
                );
                ctx.stop();
            }
        }
    }
}

impl Handler<WriteFrame> for McpWebSocket {
    type Result = ();

    fn handle(&mut self, msg: WriteFrame, ctx: &mut Self::Context) {
        self.buffered.fetch_sub(msg.payload.len(), Ordering::Relaxed);
        ctx.text(msg.payload);
    }
}

impl Handler<CloseConnection> for McpWebSocket {
    type Result = ();

    fn handle(&mut self, msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.close(msg.0);
        ctx.stop();
    }
}

/// Closes every connection bound to the session with a normal close, drops
/// the bindings, then destroys the session itself.
pub fn delete_session(
    connections: &ConnectionRegistry,
    sessions: &Arc<dyn SessionRegistry>,
    session_id: &str,
) -> bool {
    let closed = connections.close_session(
        session_id,
        CloseReason {
            code: CloseCode::Normal,
            description: Some("Session deleted".to_string()),
        },
    );
    for connection_id in &closed {
        sessions.remove_connection(connection_id);
    }
    let destroyed = sessions.destroy_session(session_id);
    if destroyed {
        tracing::debug!(%session_id, connections = closed.len(), "WebSocket session deleted");
    }
    destroyed
}

/// Resolves the `Origin` allow-list during the handshake. `None` means no
/// restriction; a literal `*` entry allows any origin.
fn origin_rejection(req: &HttpRequest, allowed_origins: Option<&Vec<String>>) -> Option<CloseReason> {
    let allowed = allowed_origins?;
    if allowed.iter().any(|o| o == "*") {
        tracing::warn!("Allowing ALL WebSocket origins (wildcard '*'). Do not use in production.");
        return None;
    }
    let origin = req
        .headers()
        .get("origin")
        .and_then(|v| v.to_str().ok());
    match origin {
        Some(origin) if allowed.iter().any(|o| o == origin) => None,
        other => {
            tracing::warn!(
                origin = other.unwrap_or("<none>"),
                "Rejected WebSocket connection from unauthorized origin"
            );
            Some(CloseReason {
                code: CloseCode::Policy,
                description: Some("Unauthorized origin".to_string()),
            })
        }
    }
}

/// WebSocket route handler - entry point for MCP connections
#[tracing::instrument(
    name = "MCP WebSocket connection",
    skip(req, stream, router, sessions, connections, settings)
)]
pub async fn mcp_websocket(
    req: HttpRequest,
    stream: web::Payload,
    router: web::Data<Arc<McpRouter>>,
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    connections: web::Data<Arc<ConnectionRegistry>>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, Error> {
    let connection_id = format!("ws_{}", uuid::Uuid::new_v4().simple());
    let ws_settings = &settings.websocket;

    let mut reject = origin_rejection(&req, ws_settings.allowed_origins.as_ref());

    let mut session = None;
    if reject.is_none() && settings.session.enabled {
        if let Some(session_id) = extract_session_id(&req) {
            let ip = client_ip(&req, &ws_settings.trusted_proxies);
            let user_agent = req
                .headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match sessions.validate_session(&session_id, Some(&ip), user_agent.as_deref()) {
                Ok(SessionValidation::Valid { user_context, .. }) => {
                    sessions.bind_connection(&session_id, &connection_id, "websocket")
                        .map_err(actix_web::error::ErrorInternalServerError)?;
                    tracing::debug!(%connection_id, %session_id, "WebSocket connection bound to session");
                    session = Some(BoundSession {
                        session_id,
                        user_context,
                    });
                }
                Ok(SessionValidation::Invalid { reason }) => {
                    tracing::warn!(%connection_id, %reason, "WebSocket session validation rejected");
                    reject = Some(CloseReason {
                        code: CloseCode::Policy,
                        description: Some(format!("Session validation failed: {}", reason)),
                    });
                }
                Err(e) => {
                    tracing::error!(%connection_id, "Session validation error: {}", e);
                    reject = Some(CloseReason {
                        code: CloseCode::Error,
                        description: Some("Session validation error".to_string()),
                    });
                }
            }
        }
    }

    let features = WelcomeFeatures {
        heartbeat: true,
        sessions: settings.session.enabled,
        compression: ws_settings.compression,
        user_context: session.is_some(),
    };

    let actor = McpWebSocket {
        connection_id,
        session,
        router: router.get_ref().clone(),
        sessions: sessions.get_ref().clone(),
        connections: connections.get_ref().clone(),
        heartbeat_interval: Duration::from_secs(ws_settings.heartbeat_interval_secs),
        features,
        is_alive: true,
        buffered: Arc::new(AtomicUsize::new(0)),
        reject,
    };

    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(ws_settings.max_payload)
        .start()
}

fn extract_session_id(req: &HttpRequest) -> Option<String> {
    let query =
        web::Query::<HashMap<String, String>>::from_query(req.query_string()).ok()?;
    query.get("sessionId").cloned()
}

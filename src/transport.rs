use std::net::TcpListener;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::dev::ServerHandle;
use actix_web_actors::ws::{CloseCode, CloseReason};
use tokio::task::JoinHandle;

use crate::configuration::Settings;
use crate::mcp::stdio::run_stdio;
use crate::mcp::{ConnectionRegistry, McpRouter};
use crate::session::SessionRegistry;
use crate::startup;

/// The three concrete carriers a client can reach the server through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
    WebSocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::WebSocket => "websocket",
        }
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "http" => Ok(TransportKind::Http),
            "websocket" => Ok(TransportKind::WebSocket),
            other => Err(TransportError::Config(format!(
                "unknown transport '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid transport configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("transport task failed: {0}")]
    Task(String),
}

/// Decides which carrier to run and owns its whole lifecycle:
/// construct, start, accept, stop.
pub struct TransportFactory {
    router: Arc<McpRouter>,
    sessions: Arc<dyn SessionRegistry>,
    settings: Settings,
}

impl TransportFactory {
    pub fn new(
        router: Arc<McpRouter>,
        sessions: Arc<dyn SessionRegistry>,
        settings: Settings,
    ) -> Self {
        Self {
            router,
            sessions,
            settings,
        }
    }

    /// First match wins: an explicit configuration value is used verbatim,
    /// `auto` falls back to runtime heuristics.
    pub fn select_kind(&self) -> TransportKind {
        match TransportKind::from_str(&self.settings.transport) {
            Ok(kind) => kind,
            Err(_) => auto_detect(&self.settings),
        }
    }

    pub async fn create(&self) -> Result<RunningTransport, TransportError> {
        let kind = self.select_kind();
        match kind {
            TransportKind::Stdio => Ok(self.start_stdio()),
            TransportKind::Http => match self.start_http().await {
                Ok(running) => Ok(running),
                // In auto mode an unusable HTTP port degrades to the pipe
                // transport instead of aborting startup
                Err(e) if self.settings.transport == "auto" => {
                    tracing::warn!(
                        "HTTP transport failed to start ({}), falling back to stdio",
                        e
                    );
                    Ok(self.start_stdio())
                }
                Err(e) => Err(e),
            },
            TransportKind::WebSocket => self.start_websocket().await,
        }
    }

    fn start_stdio(&self) -> RunningTransport {
        let router = self.router.clone();
        let join = tokio::spawn(async move { run_stdio(router).await });
        RunningTransport {
            kind: TransportKind::Stdio,
            sessions: self.sessions.clone(),
            state: Some(State::Stdio(join)),
        }
    }

    async fn start_http(&self) -> Result<RunningTransport, TransportError> {
        let address = self.settings.http.address();
        let listener = TcpListener::bind(&address)?;
        tracing::info!(%address, "MCP HTTP transport listening");

        let server = startup::run(
            listener,
            self.router.clone(),
            self.sessions.clone(),
            self.settings.clone(),
        )
        .await?;
        let handle = server.handle();
        let join = tokio::spawn(server);

        Ok(RunningTransport {
            kind: TransportKind::Http,
            sessions: self.sessions.clone(),
            state: Some(State::Server {
                handle,
                join,
                connections: None,
            }),
        })
    }

    async fn start_websocket(&self) -> Result<RunningTransport, TransportError> {
        if self.settings.websocket.tls.is_some() {
            return Err(TransportError::Config(
                "in-process TLS is not supported; terminate TLS at the reverse proxy".to_string(),
            ));
        }

        let address = self.settings.websocket.address();
        let listener = TcpListener::bind(&address)?;
        tracing::info!(%address, path = %self.settings.websocket.path, "MCP WebSocket transport listening");

        let connections = Arc::new(ConnectionRegistry::new());
        let server = startup::run_websocket(
            listener,
            self.router.clone(),
            self.sessions.clone(),
            connections.clone(),
            self.settings.clone(),
        )
        .await?;
        let handle = server.handle();
        let join = tokio::spawn(server);

        Ok(RunningTransport {
            kind: TransportKind::WebSocket,
            sessions: self.sessions.clone(),
            state: Some(State::Server {
                handle,
                join,
                connections: Some(connections),
            }),
        })
    }
}

fn auto_detect(settings: &Settings) -> TransportKind {
    // CI/test runs pipe the server like any parent process would
    if std::env::var("CI").is_ok() || std::env::var("GITHUB_ACTIONS").is_ok() {
        return TransportKind::Stdio;
    }
    if !atty::is(atty::Stream::Stdin) || !atty::is(atty::Stream::Stdout) {
        return TransportKind::Stdio;
    }
    if settings.http.port.is_some() || settings.is_production() || settings.server_mode {
        return TransportKind::Http;
    }
    TransportKind::Stdio
}

enum State {
    Stdio(JoinHandle<std::io::Result<()>>),
    Server {
        handle: ServerHandle,
        join: JoinHandle<std::io::Result<()>>,
        connections: Option<Arc<ConnectionRegistry>>,
    },
}

/// A started carrier. Dropping it leaves the carrier running; `shutdown`
/// stops it and is safe to call any number of times.
pub struct RunningTransport {
    kind: TransportKind,
    sessions: Arc<dyn SessionRegistry>,
    state: Option<State>,
}

impl RunningTransport {
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The WebSocket carrier's connection arena, for broadcast and
    /// session-targeted sends. `None` on the other carriers.
    pub fn connections(&self) -> Option<Arc<ConnectionRegistry>> {
        match &self.state {
            Some(State::Server {
                connections: Some(connections),
                ..
            }) => Some(connections.clone()),
            _ => None,
        }
    }

    /// Runs until the carrier finishes on its own: EOF on stdin for the
    /// pipe transport, server termination for the listeners.
    pub async fn wait(mut self) -> Result<(), TransportError> {
        let state = match self.state.take() {
            Some(state) => state,
            None => return Ok(()),
        };
        let join = match state {
            State::Stdio(join) => join,
            State::Server { join, .. } => join,
        };
        join.await
            .map_err(|e| TransportError::Task(e.to_string()))?
            .map_err(TransportError::Io)
    }

    /// Idempotent shutdown. Closes every WebSocket connection with 1001,
    /// unbinds them from the session registry, then stops the listener.
    pub async fn shutdown(&mut self) {
        let state = match self.state.take() {
            Some(state) => state,
            None => return,
        };
        match state {
            State::Stdio(join) => {
                join.abort();
            }
            State::Server {
                handle,
                join,
                connections,
            } => {
                if let Some(connections) = connections {
                    let closed = connections.close_all(CloseReason {
                        code: CloseCode::Away,
                        description: Some("Server shutting down".to_string()),
                    });
                    for connection_id in &closed {
                        self.sessions.remove_connection(connection_id);
                    }
                    tracing::info!(count = closed.len(), "WebSocket connections closed for shutdown");
                }
                handle.stop(true).await;
                let _ = join.await;
            }
        }
        tracing::info!(transport = self.kind.as_str(), "MCP transport stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_round_trip() {
        for kind in ["stdio", "http", "websocket"] {
            assert_eq!(TransportKind::from_str(kind).unwrap().as_str(), kind);
        }
        assert!(TransportKind::from_str("auto").is_err());
        assert!(TransportKind::from_str("smoke-signals").is_err());
    }

    #[test]
    fn auto_detect_prefers_http_for_explicit_port_or_production() {
        // The test harness has no TTY on stdin/stdout, so only exercise
        // the branch decisions that do not depend on terminal probing.
        let mut settings: Settings = serde_json::from_value(serde_json::json!({})).unwrap();
        settings.http.port = Some(3001);
        let ci = std::env::var("CI").is_ok() || std::env::var("GITHUB_ACTIONS").is_ok();
        if !ci && atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout) {
            assert_eq!(auto_detect(&settings), TransportKind::Http);
        } else {
            assert_eq!(auto_detect(&settings), TransportKind::Stdio);
        }
    }
}

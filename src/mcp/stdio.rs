//! Line-oriented stdio carrier.
//!
//! Messages are newline-delimited UTF-8 JSON-RPC: stdin receives requests,
//! stdout carries responses, stderr stays free for logging. There is no
//! session binding and no heartbeat; the pipe's lifetime is the
//! connection's lifetime. Everything else is delegation to the shared
//! router.

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::protocol::{validate_envelope, JsonRpcError, JsonRpcResponse};
use super::router::{McpRouter, RequestScope};
use crate::transport::TransportKind;

/// Buffered stdin/stdout pipe endpoint.
pub struct StdioTransport {
    reader: BufReader<tokio::io::Stdin>,
    writer: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }

    /// Reads the next message line. Returns `None` on EOF (parent closed
    /// the pipe).
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// Writes one JSON-RPC response as a single newline-terminated line.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        debug_assert!(!json.contains('\n'), "message must not contain embedded newlines");
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the stdio carrier until stdin reaches EOF.
pub async fn run_stdio(router: Arc<McpRouter>) -> io::Result<()> {
    let mut transport = StdioTransport::new();
    let scope = RequestScope {
        connection_id: format!("stdio_{}", uuid::Uuid::new_v4().simple()),
        kind: TransportKind::Stdio,
        user_context: None,
    };

    tracing::info!(connection_id = %scope.connection_id, "MCP stdio transport started");

    while let Some(line) = transport.read_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to parse stdio message: {}", e);
                let response =
                    JsonRpcResponse::error(Some(Value::Null), JsonRpcError::parse_error());
                transport.write_response(&response).await?;
                continue;
            }
        };

        let request = match validate_envelope(value) {
            Ok(request) => request,
            Err(response) => {
                transport.write_response(&response).await?;
                continue;
            }
        };

        if let Some(response) = router.dispatch(request, &scope).await {
            transport.write_response(&response).await?;
        }
    }

    tracing::info!("MCP stdio transport stopped (stdin closed)");
    Ok(())
}

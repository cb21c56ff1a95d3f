use std::sync::Arc;
use std::time::Duration;

use actix_web::http::header;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio_stream::wrappers::IntervalStream;

use super::resolve_user_context;
use crate::configuration::Settings;
use crate::mcp::protocol::{validate_envelope, JsonRpcError, JsonRpcResponse};
use crate::mcp::router::{McpRouter, RequestScope};
use crate::session::SessionRegistry;
use crate::transport::TransportKind;

/// Event-stream keep-alive cadence.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// One-shot JSON-RPC endpoint. JSON-RPC errors ride in the body with HTTP
/// success status; only pre-protocol failures surface as HTTP errors.
#[tracing::instrument(name = "MCP HTTP request", skip_all)]
#[post("/mcp")]
pub async fn rpc_endpoint(
    req: HttpRequest,
    body: web::Bytes,
    router: web::Data<Arc<McpRouter>>,
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    settings: web::Data<Settings>,
) -> HttpResponse {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Failed to parse MCP request body: {}", e);
            return HttpResponse::Ok().json(JsonRpcResponse::error(
                Some(Value::Null),
                JsonRpcError::parse_error(),
            ));
        }
    };

    let request = match validate_envelope(value) {
        Ok(request) => request,
        Err(response) => return HttpResponse::Ok().json(*response),
    };

    let scope = RequestScope {
        connection_id: format!("http_{}", uuid::Uuid::new_v4().simple()),
        kind: TransportKind::Http,
        user_context: resolve_user_context(&req, sessions.get_ref(), &settings),
    };

    // The response is a plain continuation of this request: a notification
    // has nothing to send back, everything else is one JSON body.
    match router.dispatch(request, &scope).await {
        Some(response) => HttpResponse::Ok().json(response),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Server-push event stream: an initial `connected` event, then a `ping`
/// every 15 seconds. The interval is dropped with the stream when the
/// client disconnects; buffering proxies are told to stay out of the way.
#[get("/mcp/events")]
pub async fn event_stream() -> HttpResponse {
    let connected = sse_event(&serde_json::json!({
        "type": "connected",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }));
    let first = stream::once(async move { Ok::<_, actix_web::Error>(connected) });

    let interval = tokio::time::interval_at(
        tokio::time::Instant::now() + KEEP_ALIVE_INTERVAL,
        KEEP_ALIVE_INTERVAL,
    );
    let pings = IntervalStream::new(interval).map(|_| {
        Ok(sse_event(&serde_json::json!({
            "type": "ping",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(first.chain(pings))
}

fn sse_event(payload: &Value) -> web::Bytes {
    web::Bytes::from(format!("data: {}\n\n", payload))
}

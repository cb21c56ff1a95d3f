use actix_web::{get, web, HttpResponse};
use std::sync::Arc;

use crate::configuration::Settings;
use crate::mcp::protocol::SERVER_NAME;
use crate::session::SessionRegistry;

/// Health probe. Never requires a session; reports aggregate session and
/// connection counts when sessions are enabled.
#[get("/health")]
pub async fn health(
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    settings: web::Data<Settings>,
) -> HttpResponse {
    let mut body = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "transport": "http",
        "server": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    });

    if settings.session.enabled {
        let stats = sessions.stats();
        body["sessions"] = serde_json::json!({
            "total": stats.total_sessions,
            "active": stats.active_sessions,
            "connections": stats.total_connections,
        });
    }

    HttpResponse::Ok().json(body)
}

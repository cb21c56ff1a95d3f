pub mod health;
pub mod mcp;
pub mod session;

use actix_web::HttpRequest;
use std::sync::Arc;

use crate::configuration::Settings;
use crate::helpers::client_ip;
use crate::session::{SessionRegistry, SessionValidation, UserContext};

/// Session id presented by the request: configured cookie first, then the
/// `mcp-session-id` header.
pub(crate) fn presented_session_id(req: &HttpRequest, cookie_name: &str) -> Option<String> {
    if let Some(cookie) = req.cookie(cookie_name) {
        return Some(cookie.value().to_string());
    }
    req.headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Resolves the caller's user context when a valid session accompanies the
/// request. Absent or invalid sessions simply yield no context; the MCP
/// endpoints do not require authentication themselves.
pub(crate) fn resolve_user_context(
    req: &HttpRequest,
    sessions: &Arc<dyn SessionRegistry>,
    settings: &Settings,
) -> Option<UserContext> {
    if !settings.session.enabled {
        return None;
    }
    let session_id = presented_session_id(req, &settings.session.cookie_name)?;
    let ip = client_ip(req, &settings.http.trusted_proxies);
    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok());

    match sessions.validate_session(&session_id, Some(&ip), user_agent) {
        Ok(SessionValidation::Valid { user_context, .. }) => Some(user_context),
        Ok(SessionValidation::Invalid { reason }) => {
            tracing::debug!(%session_id, %reason, "Presented session rejected");
            None
        }
        Err(e) => {
            tracing::error!(%session_id, "Session validation error: {}", e);
            None
        }
    }
}

use std::sync::Arc;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use super::presented_session_id;
use crate::configuration::Settings;
use crate::helpers::{client_ip, csrf, RateLimiter};
use crate::session::{CreateSessionOptions, SessionRegistry, SessionValidation};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSessionForm {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub organization_id: Option<String>,
    pub tenant_id: Option<String>,
    pub auto_authenticate: Option<bool>,
}

fn too_many_requests() -> HttpResponse {
    HttpResponse::TooManyRequests().json(serde_json::json!({
        "error": "Too many session requests",
        "message": "Rate limit exceeded for session endpoints",
        "retryAfter": "15 minutes",
    }))
}

fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Creates a session. When the caller already presents a session together
/// with a CSRF token, the token must validate before a new session is
/// issued (session-fixation replay defense).
#[tracing::instrument(name = "Create MCP session", skip_all)]
#[post("/mcp/session")]
pub async fn create_session(
    req: HttpRequest,
    body: web::Bytes,
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    settings: web::Data<Settings>,
    limiter: web::Data<RateLimiter>,
) -> HttpResponse {
    let ip = client_ip(&req, &settings.http.trusted_proxies);
    if !limiter.check("session_create", &ip) {
        return too_many_requests();
    }

    let form: CreateSessionForm = if body.is_empty() {
        CreateSessionForm::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(form) => form,
            Err(e) => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": "Session creation failed",
                    "message": format!("Invalid request body: {}", e),
                }))
            }
        }
    };

    if let Some(presented) = presented_session_id(&req, &settings.session.cookie_name) {
        if let Some(token) = req
            .headers()
            .get("mcp-csrf-token")
            .and_then(|v| v.to_str().ok())
        {
            if !csrf::validate_token(&settings.session.secret, &presented, token) {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "Invalid CSRF token",
                    "message": "CSRF validation failed",
                }));
            }
        }
    }

    let options = CreateSessionOptions {
        user_id: form.user_id,
        user_email: form.user_email,
        organization_id: form.organization_id,
        tenant_id: form.tenant_id,
        ip_address: Some(ip.clone()),
        user_agent: user_agent(&req),
        login_source: Some("http".to_string()),
        auto_authenticate: form.auto_authenticate.unwrap_or(true),
        ttl_secs: None,
    };

    let session = match sessions.create_session(options) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Error creating session: {}", e);
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Session creation failed",
                "message": e.to_string(),
            }));
        }
    };

    let csrf_token = csrf::generate_token(&settings.session.secret, &session.id);
    let max_age = (session.expires_at - chrono::Utc::now()).num_seconds().max(0);
    let cookie = Cookie::build(settings.session.cookie_name.clone(), session.id.clone())
        .http_only(true)
        .secure(settings.is_production())
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(actix_web::cookie::time::Duration::seconds(max_age))
        .finish();

    tracing::info!(session_id = %session.id, user_id = %session.user_id, %ip, "Session created");

    HttpResponse::Ok().cookie(cookie).json(serde_json::json!({
        "sessionId": session.id,
        "created": session.created,
        "expiresAt": session.expires_at,
        "csrfToken": csrf_token,
        "cookieName": settings.session.cookie_name,
        "user": {
            "id": session.user_id,
            "email": session.user_email,
            "organizationId": session.organization_id,
            "tenantId": session.tenant_id,
        },
    }))
}

/// Deletes a session. Only the owner may delete: either the same bound
/// session id or an authenticated identity matching the session's user.
#[tracing::instrument(name = "Delete MCP session", skip_all)]
#[delete("/mcp/session/{id}")]
pub async fn delete_session(
    req: HttpRequest,
    path: web::Path<(String,)>,
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    settings: web::Data<Settings>,
    limiter: web::Data<RateLimiter>,
) -> HttpResponse {
    let (session_id,) = path.into_inner();
    let ip = client_ip(&req, &settings.http.trusted_proxies);
    if !limiter.check("session_delete", &ip) {
        return too_many_requests();
    }

    let target = match sessions.validate_session(&session_id, None, None) {
        Ok(SessionValidation::Valid { session, .. }) => session,
        Ok(SessionValidation::Invalid { .. }) => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "error": "Session not found",
                "message": "The specified session does not exist or is invalid",
            }))
        }
        Err(e) => {
            tracing::error!("Error deleting session: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error",
            }));
        }
    };

    let requester_id = match presented_session_id(&req, &settings.session.cookie_name) {
        Some(id) => id,
        None => {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Unauthorized",
                "message": "Authentication required to delete session",
            }))
        }
    };

    let owns = requester_id == session_id || {
        matches!(
            sessions.validate_session(&requester_id, None, None),
            Ok(SessionValidation::Valid { session, .. }) if session.user_id == target.user_id
        )
    };
    if !owns {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Forbidden",
            "message": "You can only delete your own sessions",
        }));
    }

    if sessions.destroy_session(&session_id) {
        tracing::info!(%session_id, %ip, "Session deleted");
        let mut cookie = Cookie::new(settings.session.cookie_name.clone(), "");
        cookie.set_path("/");
        cookie.make_removal();
        HttpResponse::NoContent().cookie(cookie).finish()
    } else {
        HttpResponse::NotFound().json(serde_json::json!({ "error": "Session not found" }))
    }
}

/// Session metadata plus its live connection list. Callers can only read
/// their own session.
#[tracing::instrument(name = "Get MCP session", skip_all)]
#[get("/mcp/session/{id}")]
pub async fn get_session(
    req: HttpRequest,
    path: web::Path<(String,)>,
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    settings: web::Data<Settings>,
    limiter: web::Data<RateLimiter>,
) -> HttpResponse {
    let (session_id,) = path.into_inner();
    let ip = client_ip(&req, &settings.http.trusted_proxies);
    if !limiter.check("session_get", &ip) {
        return too_many_requests();
    }

    if presented_session_id(&req, &settings.session.cookie_name).as_deref() != Some(&session_id) {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Forbidden",
            "message": "Cannot access another user's session",
        }));
    }

    match sessions.validate_session(&session_id, Some(&ip), user_agent(&req).as_deref()) {
        Ok(SessionValidation::Valid { session, .. }) => {
            let connections = sessions.get_connections(&session_id);
            HttpResponse::Ok().json(serde_json::json!({
                "session": session,
                "connections": connections,
            }))
        }
        Ok(SessionValidation::Invalid { reason }) => {
            HttpResponse::NotFound().json(serde_json::json!({
                "error": "Session not found or invalid",
                "reason": reason,
            }))
        }
        Err(e) => {
            tracing::error!("Error getting session info: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error",
                "message": "Failed to retrieve session information",
            }))
        }
    }
}

/// Aggregate session counters for operational visibility.
#[get("/mcp/sessions/stats")]
pub async fn session_stats(
    req: HttpRequest,
    sessions: web::Data<Arc<dyn SessionRegistry>>,
    settings: web::Data<Settings>,
    limiter: web::Data<RateLimiter>,
) -> HttpResponse {
    let ip = client_ip(&req, &settings.http.trusted_proxies);
    if !limiter.check("session_stats", &ip) {
        return too_many_requests();
    }

    HttpResponse::Ok().json(serde_json::json!({
        "stats": sessions.stats(),
        "metrics": sessions.metrics(),
    }))
}

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;

use crate::configuration::Settings;
use crate::helpers::RateLimiter;
use crate::mcp::{self, ConnectionRegistry, McpRouter};
use crate::routes;
use crate::session::SessionRegistry;

/// Builds and starts the HTTP carrier: health probe, one-shot JSON-RPC
/// endpoint, event stream, and (when enabled) the session REST endpoints.
pub async fn run(
    listener: TcpListener,
    router: Arc<McpRouter>,
    sessions: Arc<dyn SessionRegistry>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let router = web::Data::new(router);
    let sessions = web::Data::new(sessions);
    let limiter = web::Data::new(RateLimiter::new(
        Duration::from_secs(settings.session.rate_limit_window_secs),
        settings.session.rate_limit_max,
    ));
    let session_enabled = settings.session.enabled;
    let settings = web::Data::new(settings);

    let server = HttpServer::new(move || {
        let mut app = App::new()
            .wrap(TracingLogger::default())
            .wrap(build_cors(settings.get_ref()))
            .app_data(router.clone())
            .app_data(sessions.clone())
            .app_data(limiter.clone())
            .app_data(settings.clone())
            .service(routes::health::health)
            .service(routes::mcp::rpc_endpoint)
            .service(routes::mcp::event_stream);

        if session_enabled {
            app = app
                .service(routes::session::create_session)
                .service(routes::session::get_session)
                .service(routes::session::delete_session)
                .service(routes::session::session_stats);
        }

        app
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// Builds and starts the WebSocket carrier: a dedicated listener serving
/// the persistent duplex endpoint at the configured path. The connection
/// arena is owned by the caller so shutdown and session cascades can reach
/// the open sockets.
pub async fn run_websocket(
    listener: TcpListener,
    router: Arc<McpRouter>,
    sessions: Arc<dyn SessionRegistry>,
    connections: Arc<ConnectionRegistry>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let router = web::Data::new(router);
    let sessions = web::Data::new(sessions);
    let connections = web::Data::new(connections);
    let path = settings.websocket.path.clone();
    let settings = web::Data::new(settings);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(router.clone())
            .app_data(sessions.clone())
            .app_data(connections.clone())
            .app_data(settings.clone())
            .service(web::resource(path.clone()).route(web::get().to(mcp::mcp_websocket)))
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// CORS policy from configuration. An empty origin list is the permissive
/// development default; production refuses to start that way during
/// configuration validation.
fn build_cors(settings: &Settings) -> Cors {
    let origins = &settings.http.cors_origins;
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Cors::permissive();
    }

    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "OPTIONS", "DELETE"])
        .allowed_headers(vec![
            "content-type",
            "authorization",
            "mcp-session-id",
            "mcp-csrf-token",
        ])
        .max_age(3600);
    for origin in origins {
        cors = cors.allowed_origin(origin);
    }
    if settings.http.cors_credentials {
        cors = cors.supports_credentials();
    }
    cors
}

use std::sync::Arc;
use std::time::Duration;

use workforce_mcp::configuration::get_configuration;
use workforce_mcp::mcp::{McpRouter, ToolRegistry};
use workforce_mcp::session::{InMemorySessionStore, SessionRegistry, SessionStoreConfig};
use workforce_mcp::telemetry::{get_subscriber, init_subscriber};
use workforce_mcp::transport::TransportFactory;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber("workforce-mcp".into(), "info".into());
    init_subscriber(subscriber);

    let settings = get_configuration().expect("Failed to read configuration.");
    settings.validate()?;

    let sessions: Arc<dyn SessionRegistry> = Arc::new(InMemorySessionStore::new(SessionStoreConfig {
        default_ttl: Duration::from_secs(settings.session.ttl_secs),
        enforce_ip_binding: settings.session.enforce_ip_binding,
        enforce_user_agent_binding: settings.session.enforce_user_agent_binding,
        ..Default::default()
    }));

    // The business tool handlers (employee/task/project/contact CRUD) are
    // registered here by the host application; the transports only need
    // the registry contract.
    let tools = Arc::new(ToolRegistry::new());
    let router = Arc::new(McpRouter::new(tools, sessions.clone()));

    let factory = TransportFactory::new(router, sessions, settings);
    let running = factory.create().await?;
    tracing::info!(transport = running.kind().as_str(), "MCP transport started");

    running.wait().await?;
    Ok(())
}

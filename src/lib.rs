pub mod configuration;
pub mod helpers;
pub mod mcp;
pub mod routes;
pub mod session;
pub mod startup;
pub mod telemetry;
pub mod transport;

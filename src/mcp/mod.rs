pub mod connections;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod stdio;
pub mod websocket;

pub use connections::ConnectionRegistry;
pub use protocol::*;
pub use registry::{ToolContext, ToolHandler, ToolRegistry};
pub use router::{McpRouter, RequestScope};
pub use websocket::mcp_websocket;

//! OData v2 → MCP bridge library
//!
//! Reads an OData service's metadata, projects a catalog of typed MCP
//! tools, and serves them over stdio or HTTP+SSE.

pub mod auth;
pub mod error;
pub mod hints;
pub mod mcp;
pub mod odata;
pub mod transport;

pub use auth::Auth;
pub use error::BridgeError;
pub use hints::HintManager;
pub use mcp::{McpServer, ProjectorOptions, ToolNamer};
pub use odata::{ClientOptions, MetadataLoader, NormalizeOptions, ODataClient, ServiceMetadata};
pub use transport::{HttpTransport, StdioTransport, Transport};

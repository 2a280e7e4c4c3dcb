//! MCP layer
//!
//! Protocol types, the tool projector, naming, and the dispatcher.

pub mod bridge;
pub mod naming;
pub mod protocol;
mod server;

pub use bridge::{project_tools, BridgeHandler, OpCode, ProjectorOptions, ToolDescriptor, ToolKind};
pub use naming::{service_identifier, ToolNamer};
pub use protocol::*;
pub use server::McpServer;

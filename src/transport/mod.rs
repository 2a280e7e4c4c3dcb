//! Transport layer
//!
//! Two ways to carry JSON-RPC traffic: line-delimited stdio and HTTP with
//! an SSE side-channel. The dispatcher is transport-agnostic; a transport
//! only reads requests and writes responses.

mod http;
mod stdio;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::mcp::McpServer;

pub use http::{is_localhost_addr, HttpTransport};
pub use stdio::StdioTransport;

/// A transport runs the server until EOF, shutdown signal, or fatal error.
#[async_trait]
pub trait Transport: Send {
    async fn serve(self: Box<Self>, server: Arc<McpServer>) -> Result<(), BridgeError>;
}

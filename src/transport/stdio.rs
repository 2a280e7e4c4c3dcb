//! Stdio transport
//!
//! Line-delimited JSON-RPC on stdin/stdout: one request per line, one
//! response per line, strictly serial. Diagnostics go to stderr only;
//! stdout belongs to the protocol.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::BridgeError;
use crate::mcp::{JsonRpcRequest, JsonRpcResponse, McpServer};
use crate::transport::Transport;

#[derive(Debug, Default)]
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn serve(self: Box<Self>, server: Arc<McpServer>) -> Result<(), BridgeError> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut stdout = tokio::io::stdout();

        tracing::info!("MCP server listening on stdio");

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, shutting down");
                    break;
                }
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("stdin closed, shutting down");
                    break;
                }
                Err(err) => {
                    return Err(BridgeError::Transport(format!("stdin read failed: {}", err)))
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => server.handle(request).await,
                Err(err) => {
                    tracing::debug!("Unparseable request line: {}", err);
                    Some(JsonRpcResponse::parse_error())
                }
            };

            if let Some(response) = response {
                write_line(&mut stdout, &response).await?;
            }
        }

        Ok(())
    }
}

/// Serialize and write one response line atomically, then flush.
async fn write_line(
    stdout: &mut tokio::io::Stdout,
    response: &JsonRpcResponse,
) -> Result<(), BridgeError> {
    let mut json = serde_json::to_string(response)
        .map_err(|e| BridgeError::Internal(format!("response serialization failed: {}", e)))?;
    json.push('\n');
    stdout
        .write_all(json.as_bytes())
        .await
        .map_err(|e| BridgeError::Transport(format!("stdout write failed: {}", e)))?;
    stdout
        .flush()
        .await
        .map_err(|e| BridgeError::Transport(format!("stdout flush failed: {}", e)))?;
    Ok(())
}

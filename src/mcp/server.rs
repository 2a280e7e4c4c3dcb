//! MCP dispatcher
//!
//! Holds the immutable tool table, routes the three JSON-RPC methods, and
//! validates tool arguments against each descriptor's schema before the
//! handler runs. Transport-agnostic: both transports feed requests through
//! `handle`.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::mcp::bridge::{BridgeHandler, ToolDescriptor};
use crate::mcp::protocol::{
    CallToolParams, CallToolResult, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability,
};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "odata-mcp";

/// The MCP server: tool table plus handler.
pub struct McpServer {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    handler: BridgeHandler,
    trace_log: Option<Mutex<std::fs::File>>,
}

impl McpServer {
    /// Build the server. Tools are ordered alphabetically unless sorting is
    /// disabled, and the order is fixed from here on.
    pub fn new(
        mut tools: Vec<ToolDescriptor>,
        handler: BridgeHandler,
        sort_tools: bool,
        trace_mcp_path: Option<PathBuf>,
    ) -> Self {
        if sort_tools {
            tools.sort_by(|a, b| a.name.cmp(&b.name));
        }
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name.clone(), i))
            .collect();

        let trace_log = trace_mcp_path.and_then(|path| {
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    tracing::info!("MCP trace log: {:?}", path);
                    Some(Mutex::new(file))
                }
                Err(err) => {
                    tracing::warn!("Could not open MCP trace log {:?}: {}", path, err);
                    None
                }
            }
        });

        Self {
            tools,
            index,
            handler,
            trace_log,
        }
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Handle one JSON-RPC request. Returns `None` for notifications.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.trace(">>", &request);
        let id = request.id.clone();

        if request.is_notification() {
            tracing::debug!("Notification: {}", request.method);
            return None;
        }

        let response = match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: Some(false),
                        }),
                    },
                    server_info: ServerInfo {
                        name: SERVER_NAME.to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
                }
            }

            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),

            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.tools.iter().map(ToolDescriptor::to_tool).collect(),
                };
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
                }
            }

            "tools/call" => self.call_tool(id, request.params).await,

            other => JsonRpcResponse::method_not_found(id, other),
        };

        self.trace("<<", &response);
        Some(response)
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(params) => match serde_json::from_value(params) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::invalid_params(id, format!("Invalid params: {}", e))
                }
            },
            None => return JsonRpcResponse::invalid_params(id, "Missing params"),
        };

        let Some(&slot) = self.index.get(&params.name) else {
            return JsonRpcResponse::invalid_params(
                id,
                format!("Unknown tool: {}", params.name),
            );
        };
        let descriptor = &self.tools[slot];

        let args = match validate_args(descriptor, params.arguments.unwrap_or_default()) {
            Ok(args) => args,
            Err(err) => return error_response(id, &err),
        };

        tracing::debug!("Calling tool {}", descriptor.name);
        match self.handler.call(&descriptor.kind, args).await {
            Ok(text) => {
                let result = CallToolResult::text(text);
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
                }
            }
            Err(err) => {
                tracing::debug!("Tool {} failed: {}", descriptor.name, err);
                error_response(id, &err)
            }
        }
    }

    fn trace<T: serde::Serialize>(&self, direction: &str, message: &T) {
        let Some(log) = &self.trace_log else {
            return;
        };
        if let (Ok(mut file), Ok(json)) = (log.lock(), serde_json::to_string(message)) {
            let _ = writeln!(
                file,
                "[{}] {} {}",
                chrono::Utc::now().to_rfc3339(),
                direction,
                json
            );
        }
    }
}

fn error_response(id: Option<Value>, err: &BridgeError) -> JsonRpcResponse {
    JsonRpcResponse::error_with_data(id, err.json_rpc_code(), err.to_string(), err.json_rpc_data())
}

/// Schema-driven argument check: unknown names, missing required values,
/// and type mismatches are rejected before any request goes upstream.
fn validate_args(
    descriptor: &ToolDescriptor,
    args: Map<String, Value>,
) -> Result<Map<String, Value>, BridgeError> {
    let mut validated = Map::new();

    for (name, value) in args {
        let Some(param) = descriptor.params.iter().find(|p| p.name == name) else {
            return Err(BridgeError::Argument(format!(
                "unknown argument '{}' for tool {}",
                name, descriptor.name
            )));
        };
        if value.is_null() {
            continue;
        }
        let ok = match param.json_type {
            "string" => value.is_string(),
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            _ => true,
        };
        if !ok {
            return Err(BridgeError::Argument(format!(
                "argument '{}' must be of type {}",
                name, param.json_type
            )));
        }
        validated.insert(name, value);
    }

    let missing: Vec<&str> = descriptor
        .params
        .iter()
        .filter(|p| p.required && !validated.contains_key(&p.name))
        .map(|p| p.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(BridgeError::Argument(format!(
            "missing required argument(s): {}",
            missing.join(", ")
        )));
    }

    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::bridge::{OpCode, ToolKind};
    use crate::mcp::protocol::ParamSpec;
    use serde_json::json;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "get_Products".to_string(),
            description: "test".to_string(),
            params: vec![
                ParamSpec::new("ProductID", "integer", "Edm.Int32 (key)", true),
                ParamSpec::optional_string("select", "projection"),
                ParamSpec::new("count", "boolean", "flag", false),
            ],
            kind: ToolKind::Get {
                set: "Products".to_string(),
            },
            op: OpCode::Get,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_validate_accepts_well_typed_args() {
        let validated =
            validate_args(&descriptor(), args(json!({"ProductID": 7, "select": "Name"}))).unwrap();
        assert_eq!(validated.len(), 2);
    }

    #[test]
    fn test_validate_rejects_unknown_argument() {
        let err = validate_args(&descriptor(), args(json!({"ProductID": 7, "bogus": 1})))
            .unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = validate_args(&descriptor(), args(json!({"select": "Name"}))).unwrap_err();
        assert!(err.to_string().contains("ProductID"));
    }

    #[test]
    fn test_validate_rejects_type_mismatch() {
        let err =
            validate_args(&descriptor(), args(json!({"ProductID": "seven"}))).unwrap_err();
        assert!(err.to_string().contains("integer"));

        let err = validate_args(
            &descriptor(),
            args(json!({"ProductID": 7, "count": "yes"})),
        )
        .unwrap_err();
        assert!(err.to_string().contains("boolean"));
    }

    #[test]
    fn test_validate_drops_explicit_nulls() {
        let validated = validate_args(
            &descriptor(),
            args(json!({"ProductID": 7, "select": null})),
        )
        .unwrap();
        assert!(!validated.contains_key("select"));
    }

    #[test]
    fn test_error_response_carries_structured_data() {
        let err = BridgeError::Upstream {
            status: 502,
            code: None,
            message: "bad gateway".to_string(),
            details: None,
        };
        let response = error_response(Some(json!(3)), &err);
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.data.unwrap()["http_status"], 502);
    }
}

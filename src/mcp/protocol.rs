//! MCP Protocol Implementation
//!
//! Manual implementation of the Model Context Protocol (JSON-RPC 2.0) shared
//! by both transports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A notification carries no id and expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.id == Some(Value::Null)
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    pub fn error_with_data(
        id: Option<Value>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self::error(None, -32700, "Parse error")
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, -32601, format!("Method not found: {}", method))
    }

    pub fn invalid_params(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, -32602, message)
    }
}

// MCP Protocol Types

/// Server capabilities
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server info for initialize response
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Initialize result
#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Tool definition advertised via tools/list
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// List tools result
#[derive(Debug, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Call tool request params
#[derive(Debug, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Tool result content
#[derive(Debug, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Call tool result
#[derive(Debug, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text: message,
            }],
            is_error: Some(true),
        }
    }
}

/// One named, typed tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    /// JSON Schema type: "string", "integer", "number", or "boolean".
    pub json_type: &'static str,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn new(
        name: impl Into<String>,
        json_type: &'static str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            json_type,
            description: description.into(),
            required,
        }
    }

    pub fn optional_string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, "string", description, false)
    }

    pub fn optional_integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, "integer", description, false)
    }
}

/// Create a JSON Schema object for a tool's parameters.
pub fn create_tool_schema(params: &[ParamSpec]) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for param in params {
        props.insert(
            param.name.clone(),
            serde_json::json!({
                "type": param.json_type,
                "description": param.description,
            }),
        );
        if param.required {
            required.push(param.name.clone());
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_detection() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(request.is_notification());

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(!request.is_notification());
    }

    #[test]
    fn test_response_serialization_omits_empty_fields() {
        let response = JsonRpcResponse::success(Some(json!(7)), json!({"ok": true}));
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("error"));

        let response = JsonRpcResponse::method_not_found(Some(json!(8)), "nope");
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("result"));
        assert!(text.contains("-32601"));
    }

    #[test]
    fn test_tool_schema_shape() {
        let schema = create_tool_schema(&[
            ParamSpec::new("OrderID", "integer", "Edm.Int32 (key)", true),
            ParamSpec::optional_string("expand", "Navigation properties to expand"),
        ]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["OrderID"]["type"], "integer");
        assert_eq!(schema["required"], json!(["OrderID"]));
    }

    #[test]
    fn test_call_tool_result_error_flag() {
        let result = CallToolResult::error("boom".to_string());
        assert_eq!(result.is_error, Some(true));
        let result = CallToolResult::text("fine".to_string());
        assert!(result.is_error.is_none());
    }
}

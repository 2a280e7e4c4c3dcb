//! Bridge error types
//!
//! One error enum for the whole crate, with the JSON-RPC code mapping
//! used by the dispatcher.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("CSRF token rejected after retry: {0}")]
    Csrf(String),

    #[error("OData request failed ({status}): {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation disabled by policy: {0}")]
    Policy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Build an upstream error without code or details.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        BridgeError::Upstream {
            status,
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Stable JSON-RPC error code for this kind.
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            BridgeError::Argument(_) => -32602,
            BridgeError::MetadataUnavailable(_) => -32002,
            BridgeError::Auth { .. } => -32003,
            BridgeError::Csrf(_) => -32004,
            BridgeError::Upstream { .. } => -32000,
            BridgeError::Transport(_) => -32001,
            BridgeError::Policy(_) => -32005,
            BridgeError::Internal(_) => -32603,
        }
    }

    /// Structured payload attached to the JSON-RPC error object.
    pub fn json_rpc_data(&self) -> Option<Value> {
        match self {
            BridgeError::Upstream {
                status,
                code,
                message,
                details,
            } => Some(json!({
                "http_status": status,
                "code": code,
                "message": message,
                "details": details,
            })),
            // Connection/timeout errors carry no body; status 0 marks them.
            BridgeError::Transport(message) => Some(json!({
                "http_status": 0,
                "message": message,
            })),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            BridgeError::Transport(format!("connection failed: {}", err))
        } else {
            BridgeError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_maps_to_invalid_params() {
        let err = BridgeError::Argument("missing 'filter'".to_string());
        assert_eq!(err.json_rpc_code(), -32602);
        assert!(err.json_rpc_data().is_none());
    }

    #[test]
    fn test_upstream_data_payload() {
        let err = BridgeError::Upstream {
            status: 400,
            code: Some("SY/530".to_string()),
            message: "Invalid filter".to_string(),
            details: None,
        };
        let data = err.json_rpc_data().unwrap();
        assert_eq!(data["http_status"], 400);
        assert_eq!(data["code"], "SY/530");
    }

    #[test]
    fn test_transport_synthesizes_status_zero() {
        let err = BridgeError::Transport("connection refused".to_string());
        let data = err.json_rpc_data().unwrap();
        assert_eq!(data["http_status"], 0);
    }
}

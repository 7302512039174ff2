//! JSON-RPC 2.0 wire types and the error-code mapping.

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version this server negotiates.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Parse error.
pub const PARSE_ERROR: i32 = -32700;
/// Malformed request object.
pub const INVALID_REQUEST: i32 = -32600;
/// Unknown method or tool.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Validation or input failure.
pub const INVALID_PARAMS: i32 = -32602;
/// Everything else.
pub const INTERNAL_ERROR: i32 = -32603;

/// An incoming request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, must be "2.0".
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// An outgoing response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol marker.
    pub jsonrpc: &'static str,
    /// Mirrors the request id.
    pub id: Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub const fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Standard error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured detail: stable `type` discriminator plus context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Builds an error object with a bare message.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Maps the core error taxonomy onto JSON-RPC codes.
///
/// Validation and input problems are Invalid Params; unknown tools are
/// Method Not Found (handled at dispatch); everything else is Internal.
#[must_use]
pub const fn code_for(error: &Error) -> i32 {
    match error {
        Error::InvalidInput(_)
        | Error::EntityNotFound { .. }
        | Error::InvalidContext(_)
        | Error::DuplicateEntity { .. }
        | Error::ContextNotEmpty(_)
        | Error::ConfirmationRequired { .. }
        | Error::InvalidBackupFormat(_) => INVALID_PARAMS,
        _ => INTERNAL_ERROR,
    }
}

/// Structured context payload for one error, by kind.
fn error_context(error: &Error) -> Value {
    match error {
        Error::EntityNotFound { name, context } => serde_json::json!({
            "entity": name,
            "context": context,
        }),
        Error::RateLimited {
            tool_class,
            retry_after_secs,
        } => serde_json::json!({
            "tool_class": tool_class,
            "retry_after_secs": retry_after_secs,
        }),
        Error::ConfirmationRequired { tool } => serde_json::json!({ "tool": tool }),
        Error::CircuitOpen { operation } | Error::Timeout { operation } => {
            serde_json::json!({ "operation": operation })
        },
        Error::OperationFailed { operation, cause } => serde_json::json!({
            "operation": operation,
            "cause": cause,
        }),
        _ => Value::Null,
    }
}

/// Renders a core error as a wire error with suggested actions.
#[must_use]
pub fn to_rpc_error(error: &Error) -> JsonRpcError {
    let suggestion = match error {
        Error::ConfirmationRequired { .. } => Some("retry with confirm: true"),
        Error::RateLimited { .. } => Some("wait for the window to reset, then retry"),
        Error::EntityNotFound { .. } => Some("create the entity first or check the name"),
        Error::CircuitOpen { .. } => Some("the store is failing; retry after the cooldown"),
        Error::InvalidContext(_) => Some("list_contexts shows the registered contexts"),
        _ => None,
    };
    JsonRpcError {
        code: code_for(error),
        message: error.to_string(),
        data: Some(serde_json::json!({
            "type": error.kind(),
            "context": error_context(error),
            "suggestion": suggestion,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(code_for(&Error::InvalidInput("x".to_string())), INVALID_PARAMS);
        assert_eq!(
            code_for(&Error::EntityNotFound {
                name: "a".to_string(),
                context: "c".to_string(),
            }),
            INVALID_PARAMS
        );
        assert_eq!(
            code_for(&Error::OperationFailed {
                operation: "op".to_string(),
                cause: "why".to_string(),
            }),
            INTERNAL_ERROR
        );
        assert_eq!(
            code_for(&Error::RateLimited {
                tool_class: "write".to_string(),
                retry_after_secs: 3,
            }),
            INTERNAL_ERROR
        );
    }

    #[test]
    fn test_error_data_carries_discriminator() {
        let error = Error::ConfirmationRequired {
            tool: "delete_entities".to_string(),
        };
        let rpc = to_rpc_error(&error);
        let data = rpc.data.unwrap();
        assert_eq!(data["type"], "confirmation_required");
        assert_eq!(data["context"]["tool"], "delete_entities");
        assert!(data["suggestion"].as_str().unwrap().contains("confirm"));
    }

    #[test]
    fn test_response_shapes() {
        let ok = JsonRpcResponse::success(serde_json::json!(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert!(json.get("error").is_none());

        let err = JsonRpcResponse::failure(
            serde_json::json!(2),
            JsonRpcError::new(METHOD_NOT_FOUND, "nope"),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], METHOD_NOT_FOUND);
    }
}

//! MCP-compatible request handler over the tool registry.
//!
//! JSON request/response envelope with integer error codes following the
//! JSON-RPC convention: `-32601` unknown method, `-32602` invalid params,
//! `-32603` internal error.

use super::ToolManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ERROR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERROR_INVALID_PARAMS: i32 = -32602;
pub const ERROR_INTERNAL: i32 = -32603;

/// Incoming MCP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// MCP error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
}

/// Outgoing MCP response. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl McpResponse {
    fn ok(result: serde_json::Value, id: Option<serde_json::Value>) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(code: i32, message: impl Into<String>, id: Option<serde_json::Value>) -> Self {
        Self {
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// The MCP surface.
pub struct McpServer {
    manager: Arc<ToolManager>,
    server_name: String,
    version: String,
}

impl McpServer {
    pub fn new(manager: Arc<ToolManager>) -> Self {
        Self {
            manager,
            server_name: "otto-vehicle-tools".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    /// Handle one request.
    pub fn handle(&self, request: &McpRequest) -> McpResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "tools/list" => self.handle_tools_list(request),
            "tools/call" => self.handle_tools_call(request),
            other => McpResponse::err(
                ERROR_METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
                request.id.clone(),
            ),
        }
    }

    /// Handle a raw JSON request line; malformed input maps to
    /// invalid-params.
    pub fn handle_json(&self, raw: &str) -> McpResponse {
        match serde_json::from_str::<McpRequest>(raw) {
            Ok(request) => self.handle(&request),
            Err(e) => McpResponse::err(ERROR_INVALID_PARAMS, format!("Invalid request: {e}"), None),
        }
    }

    fn handle_initialize(&self, request: &McpRequest) -> McpResponse {
        McpResponse::ok(
            serde_json::json!({
                "server_name": self.server_name,
                "version": self.version,
                "capabilities": {
                    "tools": true,
                    "resources": false,
                    "prompts": false,
                },
            }),
            request.id.clone(),
        )
    }

    fn handle_tools_list(&self, request: &McpRequest) -> McpResponse {
        let tools: Vec<serde_json::Value> = self
            .manager
            .registry()
            .list(None)
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema(),
                })
            })
            .collect();
        McpResponse::ok(serde_json::json!({ "tools": tools }), request.id.clone())
    }

    fn handle_tools_call(&self, request: &McpRequest) -> McpResponse {
        let id = request.id.clone();
        let Some(params) = &request.params else {
            return McpResponse::err(ERROR_INVALID_PARAMS, "Invalid params: missing params", id);
        };
        let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
            return McpResponse::err(ERROR_INVALID_PARAMS, "Invalid params: missing tool name", id);
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        match self.manager.execute_raw(name, &arguments) {
            Ok(output) => {
                let result = serde_json::to_value(&output).unwrap_or_default();
                McpResponse::ok(result, id)
            }
            Err(e) => {
                use super::registry::ExecuteError;
                let (code, message) = match &e {
                    ExecuteError::UnknownTool(_) | ExecuteError::InvalidParams(_) => {
                        (ERROR_INVALID_PARAMS, e.to_string())
                    }
                    ExecuteError::Execution(_) => (ERROR_INTERNAL, e.to_string()),
                };
                McpResponse::err(code, message, id)
            }
        }
    }
}

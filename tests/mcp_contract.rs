//! MCP wire surface contract.

use otto::exec::{McpServer, ToolManager};
use std::sync::Arc;

fn server() -> McpServer {
    McpServer::new(Arc::new(ToolManager::new()))
}

fn call(server: &McpServer, raw: serde_json::Value) -> otto::exec::McpResponse {
    server.handle(&serde_json::from_value(raw).expect("request"))
}

#[test]
fn missing_required_parameter_uses_exact_message() {
    // S5 verbatim.
    let response = call(
        &server(),
        serde_json::json!({
            "method": "tools/call",
            "params": {"name": "set_temperature", "arguments": {"zone": "driver"}},
            "id": "1",
        }),
    );
    let error = response.error.expect("error");
    assert_eq!(error.code, -32602);
    assert_eq!(error.message, "missing required parameter: temperature");
}

#[test]
fn enum_parameters_accept_only_declared_values() {
    let server = server();
    // Every declared enum value is accepted...
    for zone in ["driver", "passenger", "rear_left", "rear_right", "all"] {
        let response = call(
            &server,
            serde_json::json!({
                "method": "tools/call",
                "params": {"name": "set_temperature", "arguments": {"zone": zone, "temperature": 21}},
                "id": "1",
            }),
        );
        assert!(response.error.is_none(), "zone {zone} rejected");
    }
    // ...anything else is a -32602.
    let response = call(
        &server,
        serde_json::json!({
            "method": "tools/call",
            "params": {"name": "set_temperature", "arguments": {"zone": "trunk", "temperature": 21}},
            "id": "1",
        }),
    );
    assert_eq!(response.error.expect("error").code, -32602);
}

#[test]
fn unknown_method_and_unknown_tool() {
    let server = server();
    let response = call(
        &server,
        serde_json::json!({"method": "prompts/list", "id": "7"}),
    );
    let error = response.error.expect("error");
    assert_eq!(error.code, -32601);
    assert_eq!(response.id, Some(serde_json::json!("7")));

    let response = call(
        &server,
        serde_json::json!({
            "method": "tools/call",
            "params": {"name": "fly_to_the_moon", "arguments": {}},
            "id": "8",
        }),
    );
    assert_eq!(response.error.expect("error").code, -32602);
}

#[test]
fn tools_list_schemas_declare_required_fields() {
    let response = call(&server(), serde_json::json!({"method": "tools/list", "id": "1"}));
    let result = response.result.expect("result");
    let tools = result["tools"].as_array().expect("tools");
    assert!(tools.len() >= 40);

    let set_temperature = tools
        .iter()
        .find(|t| t["name"] == "set_temperature")
        .expect("set_temperature listed");
    let schema = &set_temperature["input_schema"];
    assert_eq!(schema["type"], "object");
    let required: Vec<&str> = schema["required"]
        .as_array()
        .expect("required")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(required.contains(&"zone"));
    assert!(required.contains(&"temperature"));
    assert_eq!(
        schema["properties"]["zone"]["enum"].as_array().map(Vec::len),
        Some(5)
    );
}

#[test]
fn successful_call_mutates_shared_state() {
    let manager = Arc::new(ToolManager::new());
    let server = McpServer::new(Arc::clone(&manager));
    let response = call(
        &server,
        serde_json::json!({
            "method": "tools/call",
            "params": {"name": "set_temperature", "arguments": {"zone": "driver", "temperature": 22}},
            "id": "1",
        }),
    );
    let result = response.result.expect("result");
    assert_eq!(result["success"], true);
    assert_eq!(manager.vehicle_snapshot().temperature_c["driver"], 22.0);
}

#[test]
fn initialize_handshake() {
    let response = call(&server(), serde_json::json!({"method": "initialize", "id": "1"}));
    let result = response.result.expect("result");
    assert!(result["server_name"].is_string());
    assert!(result["version"].is_string());
    assert_eq!(result["capabilities"]["tools"], true);
}

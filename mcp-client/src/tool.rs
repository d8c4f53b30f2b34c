//! The `Tool` snapshot type exposed once a client reaches
//! `connected.toolDiscovered`. Spec §3, §4.3's tool-discovery task.

use mcp_types::ToolResult;
use serde_json::Value;

/// A single MCP-sourced tool, named `"<serverId>_<originalName>"` per spec
/// §3. `input_schema`/`output_schema` are the raw JSON-Schema documents
/// advertised by the server; validating call arguments against them is left
/// to the caller (the manager/agent layer), matching spec §4.3's wording
/// that discovery converts the schema "to a runtime validator" without
/// mandating which validator.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub original_name: String,
}

impl Tool {
    pub fn from_wire(server_id: &str, wire: mcp_types::Tool) -> Self {
        Self {
            name: format!("{server_id}_{}", wire.name),
            description: wire.description,
            input_schema: wire.input_schema,
            output_schema: wire.output_schema,
            original_name: wire.name,
        }
    }
}

/// Result of `executeToolCall`, already normalized via
/// [`ToolResult::from_wire_value`].
pub type ExecuteToolResult = ToolResult;

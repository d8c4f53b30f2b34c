//! The merged tool map's entry type. Spec §4.4: built-in tools shadow MCP
//! tools of the same name.

use serde_json::Value;

/// A tool registered directly on the manager rather than discovered from an
/// MCP server. Spec §4.4's `registerTool`.
#[derive(Debug, Clone)]
pub struct BuiltinTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub enum ManagedTool {
    Builtin(BuiltinTool),
    Mcp(mcp_client::Tool),
}

impl ManagedTool {
    pub fn name(&self) -> &str {
        match self {
            ManagedTool::Builtin(tool) => &tool.name,
            ManagedTool::Mcp(tool) => &tool.name,
        }
    }
}

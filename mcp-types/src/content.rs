//! `ToolResult` content blocks.
//!
//! Spec §3: `ToolResult = { content: Block[], structuredContent?, isError? }`
//! where `Block` is a sum of `{text}`, `{image, mediaType, base64}`,
//! tool-use, and tool-result shapes.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        #[serde(rename = "mediaType")]
        media_type: String,
        base64: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        content: Vec<ContentBlock>,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[serde(rename = "isError")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Normalized result of a `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "structuredContent")]
    pub structured_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "isError")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Normalizes the MCP wire format, which allows a legacy
    /// `{toolResult: any}` shape in addition to the current `{content:[...]}`
    /// shape. Per spec §3: if legacy, wrap the JSON-serialized legacy value
    /// in a single text block.
    pub fn from_wire_value(value: Value) -> Self {
        if let Some(obj) = value.as_object() {
            if obj.contains_key("content") {
                if let Ok(parsed) = serde_json::from_value::<ToolResult>(value.clone()) {
                    return parsed;
                }
            }
            if let Some(legacy) = obj.get("toolResult") {
                return ToolResult {
                    content: vec![ContentBlock::text(
                        serde_json::to_string(legacy).unwrap_or_default(),
                    )],
                    structured_content: None,
                    is_error: None,
                };
            }
        }
        ToolResult {
            content: vec![ContentBlock::text(
                serde_json::to_string(&value).unwrap_or_default(),
            )],
            structured_content: None,
            is_error: None,
        }
    }
}

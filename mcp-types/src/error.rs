//! Typed JSON-RPC error codes for resource operations, per spec §4.3.

use thiserror::Error;

/// Standard JSON-RPC codes plus the MCP resource-specific range
/// (-32001..-32004) named in spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpErrorCode {
    NotFoundOrDisabled,
    ResourceNotFound,
    AccessDenied,
    Timeout,
    InvalidParams,
    InternalError,
    Other(i64),
}

impl McpErrorCode {
    pub fn code(self) -> i64 {
        match self {
            McpErrorCode::NotFoundOrDisabled => -32001,
            McpErrorCode::ResourceNotFound => -32002,
            McpErrorCode::AccessDenied => -32003,
            McpErrorCode::Timeout => -32004,
            McpErrorCode::InvalidParams => -32602,
            McpErrorCode::InternalError => -32603,
            McpErrorCode::Other(code) => code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -32001 => McpErrorCode::NotFoundOrDisabled,
            -32002 => McpErrorCode::ResourceNotFound,
            -32003 => McpErrorCode::AccessDenied,
            -32004 => McpErrorCode::Timeout,
            -32602 => McpErrorCode::InvalidParams,
            -32603 => McpErrorCode::InternalError,
            other => McpErrorCode::Other(other),
        }
    }
}

/// An error surfaced by a JSON-RPC response's `error` member.
#[derive(Debug, Clone, Error)]
#[error("mcp error {code}: {message}")]
pub struct McpError {
    pub code: i64,
    pub message: String,
}

impl McpError {
    pub fn kind(&self) -> McpErrorCode {
        McpErrorCode::from_code(self.code)
    }

    pub fn is_resource_not_found(&self) -> bool {
        self.kind() == McpErrorCode::ResourceNotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_codes_round_trip() {
        for code in [
            McpErrorCode::NotFoundOrDisabled,
            McpErrorCode::ResourceNotFound,
            McpErrorCode::AccessDenied,
            McpErrorCode::Timeout,
            McpErrorCode::InvalidParams,
            McpErrorCode::InternalError,
        ] {
            assert_eq!(McpErrorCode::from_code(code.code()), code);
        }
    }

    #[test]
    fn unknown_code_preserved_as_other() {
        let error = McpError {
            code: -32099,
            message: "weird".to_string(),
        };
        assert_eq!(error.kind(), McpErrorCode::Other(-32099));
    }
}

//! Error taxonomy for the connection engine. Spec §7: kinds, not concrete
//! types, so callers match on the variant rather than string contents.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum McpClientError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("transient transport error: {0}")]
    TransientTransport(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("oauth error: {0}")]
    OAuth(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error(transparent)]
    Resource(#[from] mcp_types::McpError),
}

impl McpClientError {
    pub fn from_connect_error(err: &mcp_transport::ConnectError) -> Self {
        match err {
            mcp_transport::ConnectError::ConnectCancelled => {
                McpClientError::Cancelled("connect aborted".to_string())
            }
            mcp_transport::ConnectError::Unauthorized => McpClientError::Unauthorized,
            mcp_transport::ConnectError::Transient4xx { status } => {
                McpClientError::TransientTransport(format!("http {status}"))
            }
            mcp_transport::ConnectError::Fatal(err) => McpClientError::Fatal(err.to_string()),
        }
    }
}

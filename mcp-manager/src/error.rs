//! Manager-level error kinds, per spec §7: validation failures reported
//! synchronously, plus client errors forwarded verbatim from `mcp-client`.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("server `{0}` is not registered")]
    UnknownServer(String),
    #[error("manager disposed")]
    Disposed,
    #[error(transparent)]
    Client(#[from] mcp_client::McpClientError),
}
